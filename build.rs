fn main() {
    // Load .env file for node defaults
    load_env_config();

    // Host builds (unit tests) never link the ESP runtime
    if std::env::var_os("CARGO_FEATURE_DEVICE").is_none() {
        return;
    }

    linker_be_nice();
    // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
    println!("cargo:rustc-link-arg=-Tlinkall.x");
}

/// Default light threshold in lux when nothing is configured
const DEFAULT_LIGHT_THRESHOLD: &str = "500";

/// Default per-channel log cap in bytes (50 KiB)
const DEFAULT_LOG_MAX_SIZE: &str = "51200";

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    // Tell cargo to rerun if environment variables change
    println!("cargo:rerun-if-env-changed=NODE_LIGHT_THRESHOLD");
    println!("cargo:rerun-if-env-changed=NODE_LOG_MAX_SIZE");

    // Try to load .env file if it exists
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    let threshold = numeric_env::<f32>("NODE_LIGHT_THRESHOLD", DEFAULT_LIGHT_THRESHOLD);
    let max_size = numeric_env::<u32>("NODE_LOG_MAX_SIZE", DEFAULT_LOG_MAX_SIZE);

    // Set environment variables for the compilation
    println!("cargo:rustc-env=NODE_LIGHT_THRESHOLD={}", threshold);
    println!("cargo:rustc-env=NODE_LOG_MAX_SIZE={}", max_size);
}

/// Read a numeric variable, falling back to `default` when unset, empty or malformed
fn numeric_env<T: std::str::FromStr>(key: &str, default: &str) -> String {
    let value = std::env::var(key)
        .unwrap_or_else(|_| String::new())
        .trim()
        .to_string();

    if value.is_empty() {
        return default.to_string();
    }

    if value.parse::<T>().is_err() {
        println!(
            "cargo:warning={} is not a valid number ({:?}), using default {}",
            key, value, default
        );
        return default.to_string();
    }

    println!("cargo:warning={} configured: {}", key, value);
    value
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_defmt_timestamp" => {
                    eprintln!();
                    eprintln!("💡 `defmt` not found - make sure `defmt.x` is added as a linker script and you have included `use defmt_rtt as _;`");
                    eprintln!();
                }
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "_embassy_time_now" | "_embassy_time_schedule_wake" => {
                    eprintln!();
                    eprintln!("💡 No embassy time driver linked - make sure `esp_hal_embassy::init` is called and the `device` feature is enabled");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    if let Ok(exe) = std::env::current_exe() {
        println!(
            "cargo:rustc-link-arg=--error-handling-script={}",
            exe.display()
        );
    }
}

use log::LevelFilter;
use env_logger::Builder;
use std::io::Write;
use chrono::Local;

/// Installs the timestamped console logger. `RUST_LOG` overrides the Info default.
/// Calling it more than once is a no-op.
pub fn init() {
    let installed = Builder::new()
        .format(|buf, record| {
            writeln!(buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .try_init()
        .is_ok();

    if installed {
        log::info!("Logger initialized.");
    }
}

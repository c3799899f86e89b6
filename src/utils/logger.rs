use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Install the process-wide logger. Debug mode lowers the default level so
/// transport and routing failures become visible; `RUST_LOG` still wins.
pub fn setup_logging(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = Builder::new();
    builder.target(Target::Stdout).filter_level(level);

    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    let _ = builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                std::thread::current().name().unwrap_or("unnamed"),
                record.args()
            )
        })
        .try_init();
}

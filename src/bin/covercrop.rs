//! Cover crop CLI tool
//!
//! Command-line interface for fetching remote cover images and cropping them
//! to a target aspect ratio, optionally centred on a detected face.

#[cfg(feature = "cli")]
use covercrop::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}

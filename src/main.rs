//! # Cave Engine Entry Point
//!
//! Runs the scripted headless terrain session from the library's `run()`.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release -- [config.json]
//! ```

fn main() {
    if let Err(error) = cave_engine::run() {
        log::error!("Terrain session failed: {error}");
        std::process::exit(1);
    }
}

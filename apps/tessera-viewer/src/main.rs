//! Tessera Mesh Viewer
//!
//! Draws a spinning mesh through the Tessera frame loop. Without a model
//! it shows two stacked colored quads.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p tessera-viewer -- [OPTIONS]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Built-in quads with a generated checkerboard
//! cargo run -p tessera-viewer
//!
//! # A textured OBJ model
//! cargo run -p tessera-viewer -- --model assets/room.obj --texture assets/room.png
//!
//! # Render 500 frames without vsync, then exit
//! cargo run -p tessera-viewer -- --frames 500 --no-vsync
//!
//! # Settings from a file, with custom SPIR-V
//! cargo run -p tessera-viewer -- --config viewer.toml --vert my.vert.spv --frag my.frag.spv
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod assets;

use std::path::PathBuf;

use clap::Parser;
use tessera_app::{run_app, AppConfig};

use crate::app::{Viewer, ViewerOptions};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML settings file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wavefront OBJ model to draw
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Image to sample (any format the `image` crate reads)
    #[arg(short, long)]
    texture: Option<PathBuf>,

    /// Draw vertex colors only, without a texture
    #[arg(long, conflicts_with = "texture")]
    untextured: bool,

    /// SPIR-V vertex shader replacing the built-in one
    #[arg(long, requires = "frag")]
    vert: Option<PathBuf>,

    /// SPIR-V fragment shader replacing the built-in one
    #[arg(long, requires = "vert")]
    frag: Option<PathBuf>,

    /// Exit after presenting this many frames
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Present immediately instead of waiting for vertical blank
    #[arg(long)]
    no_vsync: bool,

    /// Frames the CPU may record ahead of the GPU (1-3)
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,
}

impl Args {
    fn app_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::new("Tessera Viewer").with_size(WIDTH, HEIGHT),
        };

        if self.no_vsync {
            config = config.with_vsync(false);
        }
        if let Some(frames) = self.frames_in_flight {
            config = config.with_frames_in_flight(frames);
        }
        if let Some(frames) = self.frames {
            config = config.with_max_frames(frames);
        }
        if self.validation {
            config = config.with_validation(true);
        }

        Ok(config)
    }

    fn viewer_options(&self) -> ViewerOptions {
        ViewerOptions {
            model: self.model.clone(),
            texture: self.texture.clone(),
            untextured: self.untextured,
            shaders: self.vert.clone().zip(self.frag.clone()),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.app_config()?;

    app::set_options(args.viewer_options());

    run_app::<Viewer>(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "tessera-viewer",
            "--no-vsync",
            "--frames",
            "10",
            "--frames-in-flight",
            "3",
        ]);
        let config = args.app_config().unwrap();
        assert!(!config.vsync);
        assert_eq!(config.max_frames, Some(10));
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!((config.width, config.height), (WIDTH, HEIGHT));
    }

    #[test]
    fn shaders_must_come_in_pairs() {
        assert!(Args::try_parse_from(["tessera-viewer", "--vert", "a.spv"]).is_err());

        let args =
            Args::try_parse_from(["tessera-viewer", "--vert", "a.spv", "--frag", "b.spv"]).unwrap();
        let options = args.viewer_options();
        assert_eq!(
            options.shaders,
            Some((PathBuf::from("a.spv"), PathBuf::from("b.spv")))
        );
    }

    #[test]
    fn untextured_conflicts_with_texture() {
        assert!(
            Args::try_parse_from(["tessera-viewer", "--untextured", "--texture", "t.png"]).is_err()
        );
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::parse_from(["tessera-viewer", "--config", "/nonexistent/viewer.toml"]);
        assert!(args.app_config().is_err());
    }
}

//! Renders a palette descriptor to a blurred PNG for eyeballing
//! placeholder output without a host runtime.

use clap::Parser;
use respimg::placeholder::{parse_palette, render_blurred_mosaic};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
  name = "placeholder_preview",
  about = "Render a blur-up palette descriptor to a PNG"
)]
struct Args {
  /// Palette descriptor: whitespace-delimited hex tokens ("ff0000 00ff00 ...")
  /// or a packed hex blob
  descriptor: String,

  /// Output PNG path
  #[arg(long, default_value = "placeholder.png")]
  out: PathBuf,

  /// Canvas side length in pixels
  #[arg(long, default_value_t = 60)]
  size: u32,
}

fn main() -> ExitCode {
  let args = Args::parse();

  let palette = parse_palette(&args.descriptor);
  if palette.is_empty() {
    eprintln!("descriptor yielded no valid colors");
    return ExitCode::FAILURE;
  }

  let pixels = match render_blurred_mosaic(&args.descriptor, args.size, args.size) {
    Ok(pixels) => pixels,
    Err(err) => {
      eprintln!("failed to render placeholder: {err}");
      return ExitCode::FAILURE;
    }
  };

  let image = match image::RgbaImage::from_raw(args.size, args.size, pixels) {
    Some(image) => image,
    None => {
      eprintln!("rendered buffer does not match {}x{}", args.size, args.size);
      return ExitCode::FAILURE;
    }
  };

  if let Err(err) = image.save(&args.out) {
    eprintln!("failed to write {}: {err}", args.out.display());
    return ExitCode::FAILURE;
  }

  println!(
    "wrote {} ({} colors, {}x{})",
    args.out.display(),
    palette.len(),
    args.size,
    args.size
  );
  ExitCode::SUCCESS
}

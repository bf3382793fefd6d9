use std::path::Path;

use anyhow::{anyhow, Context};

pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 pixel data, `width * height * 4` bytes.
    pub bytes: Vec<u8>,
}

/// Decode a PNG file into RGBA8, resampling to the requested dimensions.
/// A width or height of -1 derives from the source, preserving aspect ratio
/// when the other axis is provided.
pub fn decode_and_resize(path: &Path, width: i32, height: i32) -> anyhow::Result<DecodedImage> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {path:?}"))?;
    let mut decoder = png::Decoder::new(std::io::BufReader::new(file));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().context("reading png info")?;
    let mut buffer = vec![0u8; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buffer).context("decoding png frame")?;
    buffer.truncate(info.buffer_size());

    let source_width = info.width;
    let source_height = info.height;
    let rgba = to_rgba(&buffer, info.color_type)?;

    let (target_width, target_height) =
        target_dimensions(source_width, source_height, width, height);
    if target_width == source_width && target_height == source_height {
        return Ok(DecodedImage {
            width: source_width,
            height: source_height,
            bytes: rgba,
        });
    }

    Ok(DecodedImage {
        width: target_width,
        height: target_height,
        bytes: resample_nearest(
            &rgba,
            source_width,
            source_height,
            target_width,
            target_height,
        ),
    })
}

fn target_dimensions(
    source_width: u32,
    source_height: u32,
    width: i32,
    height: i32,
) -> (u32, u32) {
    match (width, height) {
        (-1, -1) => (source_width, source_height),
        (-1, height) => {
            let height = height.max(1) as u32;
            ((height * source_width / source_height).max(1), height)
        }
        (width, -1) => {
            let width = width.max(1) as u32;
            (width, (width * source_height / source_width).max(1))
        }
        (width, height) => (width.max(1) as u32, height.max(1) as u32),
    }
}

fn to_rgba(buffer: &[u8], color_type: png::ColorType) -> anyhow::Result<Vec<u8>> {
    match color_type {
        png::ColorType::Rgba => Ok(buffer.to_vec()),
        png::ColorType::Rgb => Ok(buffer
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 0xff])
            .collect()),
        png::ColorType::Grayscale => Ok(buffer
            .iter()
            .flat_map(|&v| [v, v, v, 0xff])
            .collect()),
        png::ColorType::GrayscaleAlpha => Ok(buffer
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0], px[1]])
            .collect()),
        other => Err(anyhow!("unsupported png color type {other:?}")),
    }
}

fn resample_nearest(
    rgba: &[u8],
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity((target_width * target_height * 4) as usize);
    for y in 0..target_height {
        let source_y = (y as u64 * source_height as u64 / target_height as u64)
            .min(source_height as u64 - 1) as u32;
        for x in 0..target_width {
            let source_x = (x as u64 * source_width as u64 / target_width as u64)
                .min(source_width as u64 - 1) as u32;
            let offset = ((source_y * source_width + source_x) * 4) as usize;
            out.extend_from_slice(&rgba[offset..offset + 4]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_png(path: &Path, width: u32, height: u32) {
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = png::Encoder::new(std::io::BufWriter::new(file), width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        let pixels: Vec<u8> = (0..width * height)
            .flat_map(|i| [(i % 256) as u8, 0x40, 0x80, 0xff])
            .collect();
        writer.write_image_data(&pixels).unwrap();
    }

    #[test]
    fn decodes_at_source_dimensions() {
        let dir = std::env::temp_dir().join("synth-image-file-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("source.png");
        write_test_png(&path, 8, 4);
        let decoded = decode_and_resize(&path, -1, -1).unwrap();
        assert_eq!(8, decoded.width);
        assert_eq!(4, decoded.height);
        assert_eq!(8 * 4 * 4, decoded.bytes.len());
    }

    #[test]
    fn resamples_preserving_aspect() {
        let dir = std::env::temp_dir().join("synth-image-file-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("aspect.png");
        write_test_png(&path, 8, 4);
        let decoded = decode_and_resize(&path, 4, -1).unwrap();
        assert_eq!(4, decoded.width);
        assert_eq!(2, decoded.height);
        assert_eq!(4 * 2 * 4, decoded.bytes.len());
    }

    #[test]
    fn missing_file_reports_error() {
        assert!(decode_and_resize(Path::new("/nonexistent/image.png"), -1, -1).is_err());
    }
}

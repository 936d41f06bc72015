use image::imageops::FilterType;
use ndarray::Array4;
use std::io::Cursor;
use thiserror::Error;

pub const INPUT_WIDTH: u32 = 224;
pub const INPUT_HEIGHT: u32 = 224;

/// ImageNet channel statistics, matching the normalization the classifier
/// was trained with.
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to read image data: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Turns encoded image bytes into a normalized NCHW tensor of shape
/// [1, 3, 224, 224]. Non-RGB sources (grayscale, alpha) are converted to
/// 3-channel color; the resize is non-aspect-preserving.
pub fn preprocess_image(image_data: &[u8]) -> Result<Array4<f32>, DecodeError> {
    let reader = image::ImageReader::new(Cursor::new(image_data)).with_guessed_format()?;
    let decoded = reader.decode()?;

    let img = decoded
        .resize_exact(INPUT_WIDTH, INPUT_HEIGHT, FilterType::Triangle)
        .to_rgb8();

    let mut input = Array4::<f32>::zeros((1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = ((r as f32) / 255. - CHANNEL_MEAN[0]) / CHANNEL_STD[0];
        input[[0, 1, y, x]] = ((g as f32) / 255. - CHANNEL_MEAN[1]) / CHANNEL_STD[1];
        input[[0, 2, y, x]] = ((b as f32) / 255. - CHANNEL_MEAN[2]) / CHANNEL_STD[2];
    }

    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};
    use std::io::Cursor;

    fn encode_rgb_png(img: &ImageBuffer<Rgb<u8>, Vec<u8>>) -> Vec<u8> {
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn encode_luma_png(img: &ImageBuffer<Luma<u8>, Vec<u8>>) -> Vec<u8> {
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_preprocess_rgb_image() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 80, Rgb([255, 0, 0]));
        let input = preprocess_image(&encode_rgb_png(&img)).unwrap();

        assert_eq!(input.shape(), &[1, 3, 224, 224]);

        // A saturated red pixel normalizes to (1 - mean) / std on the red
        // channel and (0 - mean) / std on the others.
        let expected_r = (1.0 - CHANNEL_MEAN[0]) / CHANNEL_STD[0];
        let expected_g = (0.0 - CHANNEL_MEAN[1]) / CHANNEL_STD[1];
        let expected_b = (0.0 - CHANNEL_MEAN[2]) / CHANNEL_STD[2];
        assert!((input[[0, 0, 112, 112]] - expected_r).abs() < 1e-4);
        assert!((input[[0, 1, 112, 112]] - expected_g).abs() < 1e-4);
        assert!((input[[0, 2, 112, 112]] - expected_b).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_grayscale_image() {
        let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_pixel(64, 64, Luma([128]));
        let input = preprocess_image(&encode_luma_png(&img)).unwrap();

        assert_eq!(input.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_preprocess_values_stay_in_normalized_range() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(50, 50, |x, y| {
            Rgb([(x * 5) as u8, (y * 5) as u8, ((x + y) * 2) as u8])
        });
        let input = preprocess_image(&encode_rgb_png(&img)).unwrap();

        // The tightest bounds implied by the ImageNet constants are roughly
        // [-2.12, 2.64] across channels.
        for value in input.iter() {
            assert!(*value >= -3.0 && *value <= 3.0, "out of range: {}", value);
        }
    }

    #[test]
    fn test_preprocess_rejects_corrupt_bytes() {
        let result = preprocess_image(&[0u8, 1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(DecodeError::Decode(_))));
    }
}

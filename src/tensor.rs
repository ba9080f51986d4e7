use image::{GrayImage, ImageBuffer, RgbaImage};
use ndarray::Array3;
use tracing::instrument;

/// Builds a `(3, H, W)` tensor from the RGB channels of `image`, normalised as
/// `(pixel / 255 - mean[c]) / std[c]`. Alpha is ignored.
#[instrument(level = "debug", skip(image))]
pub fn image_to_detection_tensor(
    image: &RgbaImage,
    mean: &[f32; 3],
    std: &[f32; 3],
) -> Array3<f32> {
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| {
            let value = image.get_pixel(x as u32, y as u32).0[ch] as f32 / 255.0;
            (value - mean[ch]) / std[ch]
        },
    )
}

/// Builds a `(3, H, W)` tensor from an image that is already grayscale.
///
/// Only the red channel is read; the normalised value `(gray / 255 - 0.5) / 0.5`
/// is written to all three planes.
#[instrument(level = "trace", skip(image))]
pub fn image_to_recognition_tensor(image: &RgbaImage) -> Array3<f32> {
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(_, y, x)| {
            let gray = image.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0;
            (gray - 0.5) / 0.5
        },
    )
}

/// Renders a row-major probability map as an 8-bit image.
///
/// Entries past the end of `data` or that are not finite become 0.
pub fn probability_map_to_gray(data: &[f32], width: u32, height: u32) -> GrayImage {
    let len = width as usize * height as usize;
    let pixel_data = (0..len)
        .map(|i| {
            let p = data.get(i).copied().filter(|p| p.is_finite()).unwrap_or(0.0);
            (p * 255.0).round() as u8
        })
        .collect::<Vec<u8>>();
    ImageBuffer::from_raw(width, height, pixel_data)
        .unwrap_or_else(|| GrayImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn detection_tensor_is_channel_planar() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, Rgba([255, 0, 51, 7]));
        image.put_pixel(1, 0, Rgba([0, 255, 102, 200]));
        let mean = [0.5, 0.0, 0.2];
        let std = [0.5, 1.0, 0.1];

        let tensor = image_to_detection_tensor(&image, &mean, &std);
        assert_eq!(tensor.shape(), &[3, 1, 2]);

        let flat = tensor.as_slice().unwrap();
        let expected = [1.0, -1.0, 0.0, 1.0, 0.0, 2.0];
        for (got, want) in flat.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5, "{got} != {want}");
        }
    }

    #[test]
    fn recognition_tensor_replicates_red_channel() {
        let mut image = RgbaImage::new(1, 2);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        image.put_pixel(0, 1, Rgba([0, 255, 255, 255]));

        let tensor = image_to_recognition_tensor(&image);
        for ch in 0..3 {
            assert!((tensor[[ch, 0, 0]] - 1.0).abs() < 1e-6);
            assert!((tensor[[ch, 1, 0]] + 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn probability_map_scales_and_defaults_missing_entries() {
        let image = probability_map_to_gray(&[0.0, 0.5, 1.0, f32::NAN, 0.2], 3, 2);
        let values = image.into_raw();
        assert_eq!(values, vec![0, 128, 255, 0, 51, 0]);
    }
}

//! Frame → HSV matrix and colour-range masks, OpenCV 8-bit convention
//! (H in 0..=180, S and V in 0..=255).

use image::RgbImage;
use opencv::core::{self, Mat, Rect, Scalar};
use opencv::imgproc::{self, COLOR_RGB2HSV};
use opencv::prelude::*;

use crate::errors::PilotResult;
use crate::perception::types::HsvRange;

pub fn to_hsv(image: &RgbImage) -> PilotResult<Mat> {
    let mut rgb = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        core::CV_8UC3,
        Scalar::all(0.0),
    )?;
    rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());

    let mut hsv = Mat::default();
    imgproc::cvt_color(&rgb, &mut hsv, COLOR_RGB2HSV, 0, core::AlgorithmHint::ALGO_HINT_DEFAULT)?;
    Ok(hsv)
}

/// Owned copy of `rect` out of `hsv`.
pub fn crop(hsv: &Mat, rect: Rect) -> PilotResult<Mat> {
    Ok(Mat::roi(hsv, rect)?.try_clone()?)
}

fn bound([h, s, v]: [u8; 3]) -> Scalar {
    Scalar::new(h as f64, s as f64, v as f64, 0.0)
}

/// `in_range` of every range, OR-ed into one CV_8UC1 mask.
pub fn range_mask(hsv: &Mat, ranges: &[HsvRange]) -> PilotResult<Mat> {
    let mut acc = Mat::new_rows_cols_with_default(hsv.rows(), hsv.cols(), core::CV_8UC1, Scalar::all(0.0))?;
    for r in ranges {
        let mut mask = Mat::default();
        core::in_range(hsv, &bound(r.lower), &bound(r.upper), &mut mask)?;
        let mut merged = Mat::default();
        core::bitwise_or(&acc, &mask, &mut merged, &core::no_array())?;
        acc = merged;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn strip(colors: &[[u8; 3]]) -> RgbImage {
        let mut img = RgbImage::new(colors.len() as u32, 1);
        for (i, c) in colors.iter().enumerate() {
            img.put_pixel(i as u32, 0, Rgb(*c));
        }
        img
    }

    #[test]
    fn primaries_map_to_opencv_hues() {
        let hsv = to_hsv(&strip(&[[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 255], [0, 0, 0]])).unwrap();
        let px = |i: i32| {
            let v = *hsv.at_2d::<core::Vec3b>(0, i).unwrap();
            [v[0], v[1], v[2]]
        };
        assert_eq!(px(0), [0, 255, 255]);
        assert_eq!(px(1), [60, 255, 255]);
        assert_eq!(px(2), [120, 255, 255]);
        assert_eq!(px(3), [0, 0, 255]);
        assert_eq!(px(4), [0, 0, 0]);
    }

    #[test]
    fn mask_is_union_of_ranges() {
        let hsv = to_hsv(&strip(&[[255, 0, 0], [0, 255, 0], [0, 0, 255], [0, 0, 0]])).unwrap();
        let ranges = [
            HsvRange::new([0, 100, 100], [10, 255, 255]),
            HsvRange::new([110, 100, 100], [130, 255, 255]),
        ];
        let mask = range_mask(&hsv, &ranges).unwrap();
        let on: Vec<bool> = (0..4).map(|i| *mask.at_2d::<u8>(0, i).unwrap() > 0).collect();
        assert_eq!(on, vec![true, false, true, false]);
        assert_eq!(core::count_non_zero(&mask).unwrap(), 2);
    }

    #[test]
    fn crop_keeps_only_the_rectangle() {
        let hsv = to_hsv(&RgbImage::new(10, 8)).unwrap();
        let part = crop(&hsv, Rect::new(2, 3, 4, 5)).unwrap();
        assert_eq!((part.cols(), part.rows()), (4, 5));
    }
}

use opencv::core::{self, Mat, Rect};
use opencv::imgproc;
use opencv::prelude::*;

use crate::errors::PilotResult;
use crate::perception::hsv::{crop, range_mask, to_hsv};
use crate::perception::types::{ClusterSpec, DetectionResult, DetectionTarget, Point, Screenshot};

/// An 8-connected blob of in-range pixels, in frame coordinates.
#[derive(Debug, Clone, Copy)]
struct Component {
    width: i32,
    height: i32,
    area: u32,
    cx: f64,
    cy: f64,
}

impl Component {
    fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

/// Evaluate one target against one frame. Pure: the result depends only on
/// the frame pixels and the target definition.
pub fn detect(shot: &Screenshot, target: &DetectionTarget) -> PilotResult<DetectionResult> {
    if target.region.clip(shot.width(), shot.height()).is_none() {
        return Ok(DetectionResult::absent());
    }
    let hsv = to_hsv(shot.image())?;
    detect_in(&hsv, target)
}

/// `detect` against a frame already converted with [`to_hsv`].
pub fn detect_in(hsv: &Mat, target: &DetectionTarget) -> PilotResult<DetectionResult> {
    let Some((x0, y0, x1, y1)) = target.region.clip(hsv.cols() as u32, hsv.rows() as u32) else {
        return Ok(DetectionResult::absent());
    };
    let rect = Rect::new(x0 as i32, y0 as i32, (x1 - x0) as i32, (y1 - y0) as i32);
    if rect.width == 0 || rect.height == 0 {
        return Ok(DetectionResult::absent());
    }
    let mask = range_mask(&crop(hsv, rect)?, &target.ranges)?;

    if let Some(threshold) = target.fill_threshold {
        let fraction = core::count_non_zero(&mask)? as f64 / rect.area() as f64;
        return Ok(if fraction >= threshold as f64 {
            DetectionResult::at(target.region.center(), fraction)
        } else {
            DetectionResult::absent()
        });
    }

    let accepted: Vec<Component> = components(&mask, rect)?
        .into_iter()
        .filter(|c| c.area >= target.area[0] && c.area <= target.area[1])
        .filter(|c| match target.aspect {
            Some([lo, hi]) => (lo..=hi).contains(&c.aspect()),
            None => true,
        })
        .collect();

    if let Some(grouping) = target.cluster {
        return Ok(first_cluster(&accepted, grouping));
    }

    Ok(accepted
        .iter()
        .max_by_key(|c| c.area)
        .map(|c| DetectionResult::at(Point::new(c.cx.round() as i32, c.cy.round() as i32), c.area as f64))
        .unwrap_or_else(DetectionResult::absent))
}

/// Components ordered top to bottom, grouped while the vertical gap between
/// neighbours stays below `max_gap`. The first group with enough members
/// wins and reports the mean of its centroids.
fn first_cluster(accepted: &[Component], grouping: ClusterSpec) -> DetectionResult {
    let mut centres: Vec<(f64, f64, u32)> = accepted.iter().map(|c| (c.cx, c.cy, c.area)).collect();
    centres.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut start = 0;
    for end in 1..=centres.len() {
        let split = end == centres.len() || centres[end].1 - centres[end - 1].1 >= grouping.max_gap as f64;
        if !split {
            continue;
        }
        let group = &centres[start..end];
        if group.len() >= grouping.min_members.max(1) {
            let n = group.len() as f64;
            let mx = group.iter().map(|c| c.0).sum::<f64>() / n;
            let my = group.iter().map(|c| c.1).sum::<f64>() / n;
            let area: u32 = group.iter().map(|c| c.2).sum();
            return DetectionResult::at(Point::new(mx.round() as i32, my.round() as i32), area as f64);
        }
        start = end;
    }
    DetectionResult::absent()
}

/// Label the mask with `connected_components_with_stats` and shift every
/// component from crop to frame coordinates.
fn components(mask: &Mat, origin: Rect) -> PilotResult<Vec<Component>> {
    let mut labels = Mat::default();
    let mut stats = Mat::default();
    let mut centroids = Mat::default();
    let count = imgproc::connected_components_with_stats(
        mask,
        &mut labels,
        &mut stats,
        &mut centroids,
        8,
        core::CV_32S,
    )?;

    let mut out = Vec::with_capacity(count.max(1) as usize - 1);
    for i in 1..count {
        let width = *stats.at_2d::<i32>(i, imgproc::CC_STAT_WIDTH)?;
        let height = *stats.at_2d::<i32>(i, imgproc::CC_STAT_HEIGHT)?;
        let area = *stats.at_2d::<i32>(i, imgproc::CC_STAT_AREA)?;
        let cx = *centroids.at_2d::<f64>(i, 0)?;
        let cy = *centroids.at_2d::<f64>(i, 1)?;
        out.push(Component {
            width,
            height,
            area: area.max(0) as u32,
            cx: cx + origin.x as f64,
            cy: cy + origin.y as f64,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::{HsvRange, Region};
    use image::{Rgb, RgbImage};

    const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

    fn detect_ok(shot: &Screenshot, target: &DetectionTarget) -> DetectionResult {
        detect(shot, target).unwrap()
    }

    fn green_target(region: Region, area: [u32; 2]) -> DetectionTarget {
        DetectionTarget::new(
            "green",
            vec![HsvRange::new([50, 100, 100], [70, 255, 255])],
            region,
            area,
        )
    }

    fn square(img: &mut RgbImage, x: u32, y: u32, side: u32, color: Rgb<u8>) {
        for yy in y..y + side {
            for xx in x..x + side {
                img.put_pixel(xx, yy, color);
            }
        }
    }

    #[test]
    fn square_inside_region_is_found_inside_region() {
        let mut img = RgbImage::new(400, 300);
        square(&mut img, 110, 115, 20, GREEN);
        let region = Region::new(100, 100, 50, 50);
        let r = detect_ok(&Screenshot::from_rgb(img), &green_target(region, [150, 3000]));
        assert!(r.found);
        let p = r.point.unwrap();
        assert!(region.contains(p));
        assert_eq!(p, Point::new(120, 125));
        assert_eq!(r.confidence, 400.0);
    }

    #[test]
    fn pixels_outside_region_are_ignored() {
        let mut img = RgbImage::new(400, 300);
        square(&mut img, 200, 200, 20, GREEN);
        let r = detect_ok(
            &Screenshot::from_rgb(img),
            &green_target(Region::new(100, 100, 50, 50), [150, 3000]),
        );
        assert!(!r.found);
        assert!(r.point.is_none());
    }

    #[test]
    fn area_bounds_filter_components() {
        let mut img = RgbImage::new(200, 200);
        square(&mut img, 10, 10, 5, GREEN); // 25 px, too small
        square(&mut img, 100, 100, 60, GREEN); // 3600 px, too big
        let shot = Screenshot::from_rgb(img);
        let r = detect_ok(&shot, &green_target(Region::new(0, 0, 200, 200), [150, 3000]));
        assert!(!r.found);

        let r = detect_ok(&shot, &green_target(Region::new(0, 0, 200, 200), [20, 5000]));
        assert!(r.found);
        assert_eq!(r.confidence, 3600.0);
    }

    #[test]
    fn diagonal_pixels_join_one_component() {
        let mut img = RgbImage::new(20, 20);
        for i in 0..10 {
            img.put_pixel(i, i, GREEN);
        }
        let r = detect_ok(
            &Screenshot::from_rgb(img),
            &green_target(Region::new(0, 0, 20, 20), [10, 10]),
        );
        assert!(r.found);
    }

    #[test]
    fn region_partly_off_frame_is_clipped() {
        let mut img = RgbImage::new(100, 100);
        square(&mut img, 85, 85, 15, GREEN);
        let r = detect_ok(
            &Screenshot::from_rgb(img),
            &green_target(Region::new(80, 80, 500, 500), [100, 1000]),
        );
        assert!(r.found);
    }

    #[test]
    fn fill_threshold_scores_whole_region() {
        let white = DetectionTarget {
            fill_threshold: Some(0.9),
            ..DetectionTarget::new(
                "flash",
                vec![HsvRange::new([0, 0, 200], [180, 40, 255])],
                Region::new(0, 0, 100, 100),
                [1, u32::MAX],
            )
        };
        let mut img = RgbImage::from_pixel(100, 100, Rgb([250, 250, 250]));
        let r = detect_ok(&Screenshot::from_rgb(img.clone()), &white);
        assert!(r.found);
        assert_eq!(r.point, Some(Point::new(50, 50)));

        square(&mut img, 0, 0, 40, Rgb([10, 10, 10]));
        let r = detect_ok(&Screenshot::from_rgb(img), &white);
        assert!(!r.found);
    }

    #[test]
    fn cluster_reports_first_row_with_enough_members() {
        let mut img = RgbImage::new(300, 400);
        // lone icon at the top, then a row of three further down
        square(&mut img, 20, 20, 15, GREEN);
        square(&mut img, 20, 200, 15, GREEN);
        square(&mut img, 80, 205, 15, GREEN);
        square(&mut img, 140, 200, 15, GREEN);
        let target = DetectionTarget {
            cluster: Some(ClusterSpec {
                min_members: 2,
                max_gap: 80,
            }),
            ..green_target(Region::new(0, 0, 300, 400), [150, 3000])
        };
        let r = detect_ok(&Screenshot::from_rgb(img), &target);
        assert!(r.found);
        let p = r.point.unwrap();
        assert_eq!(p.x, 87);
        assert!((205..=210).contains(&p.y));
    }

    #[test]
    fn aspect_filter_rejects_bars() {
        let mut img = RgbImage::new(200, 200);
        for x in 10..110 {
            for y in 10..14 {
                img.put_pixel(x, y, GREEN);
            }
        }
        let target = DetectionTarget {
            aspect: Some([0.5, 2.5]),
            ..green_target(Region::new(0, 0, 200, 200), [100, 3000])
        };
        assert!(!detect_ok(&Screenshot::from_rgb(img), &target).found);
    }

    #[test]
    fn icons_exactly_max_gap_apart_are_separate_groups() {
        let mut img = RgbImage::new(200, 300);
        square(&mut img, 20, 20, 15, GREEN);
        square(&mut img, 20, 100, 15, GREEN);
        let target = DetectionTarget {
            cluster: Some(ClusterSpec {
                min_members: 2,
                max_gap: 80,
            }),
            ..green_target(Region::new(0, 0, 200, 300), [150, 3000])
        };
        assert!(!detect_ok(&Screenshot::from_rgb(img.clone()), &target).found);

        square(&mut img, 60, 101, 15, GREEN);
        assert!(detect_ok(&Screenshot::from_rgb(img), &target).found);
    }

    #[test]
    fn prepared_hsv_frame_matches_direct_detection() {
        let mut img = RgbImage::new(100, 100);
        square(&mut img, 40, 40, 20, GREEN);
        let shot = Screenshot::from_rgb(img);
        let target = green_target(Region::new(0, 0, 100, 100), [150, 3000]);
        let hsv = to_hsv(shot.image()).unwrap();
        assert_eq!(detect_in(&hsv, &target).unwrap(), detect_ok(&shot, &target));
    }
}

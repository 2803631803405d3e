use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::Region;

pub const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_THICKNESS: u32 = 2;
/// Region size divided by this gives the blur strength. Larger is weaker.
const BLUR_FACTOR: f32 = 3.0;

/// Blur each region in place.
pub fn blur_regions(img: &mut RgbImage, regions: &[Region]) {
    let (width, height) = img.dimensions();
    for region in regions {
        let r = region.clamp_to(width, height);
        if r.width() < 2 || r.height() < 2 {
            continue;
        }
        let sigma = (r.width().min(r.height()) as f32 / BLUR_FACTOR) / 2.0;
        let patch = imageops::crop_imm(&*img, r.x1, r.y1, r.width(), r.height()).to_image();
        let blurred = imageops::blur(&patch, sigma.max(0.5));
        imageops::replace(img, &blurred, r.x1 as i64, r.y1 as i64);
    }
}

/// Draw a thick outline around each region.
pub fn outline_regions(img: &mut RgbImage, regions: &[Region], color: Rgb<u8>) {
    for region in regions {
        if region.is_empty() {
            continue;
        }
        for offset in 0..OUTLINE_THICKNESS {
            let rect = Rect::at(region.x1 as i32 - offset as i32, region.y1 as i32 - offset as i32)
                .of_size(region.width() + offset * 2, region.height() + offset * 2);
            draw_hollow_rect_mut(img, rect, color);
        }
    }
}

/// The presentation used for saved frames: blurred regions with a green outline.
pub fn draw_motion(img: &mut RgbImage, regions: &[Region]) {
    blur_regions(img, regions);
    outline_regions(img, regions, OUTLINE_COLOR);
}

//! Binary resolvers: one per payload kind.

pub mod formula;
pub mod image;
pub mod qr;

use super::traits::AssetFetcher;
use super::value::{EmbeddedObject, Extent, Payload, PlacementToken};
use super::ResolveError;

/// EMU per millimetre.
pub const EMU_PER_MM: f64 = 36_000.0;
/// EMU per pixel at 72 DPI.
pub const EMU_PER_PIXEL: i64 = 12_700;

pub fn mm_to_emu(mm: f64) -> i64 {
    (mm * EMU_PER_MM).round() as i64
}

/// Target extent for a raster of `native` pixels with optional requested size in mm.
///
/// With one side given the other follows the native aspect ratio. With neither,
/// the native pixel size is used at 72 DPI.
pub fn scaled_extent(native: (u64, u64), width_mm: Option<f64>, height_mm: Option<f64>) -> Extent {
    let (px_w, px_h) = (native.0.max(1) as f64, native.1.max(1) as f64);
    match (width_mm, height_mm) {
        (Some(w), Some(h)) => Extent {
            cx: mm_to_emu(w),
            cy: mm_to_emu(h),
        },
        (Some(w), None) => Extent {
            cx: mm_to_emu(w),
            cy: mm_to_emu(w * px_h / px_w),
        },
        (None, Some(h)) => Extent {
            cx: mm_to_emu(h * px_w / px_h),
            cy: mm_to_emu(h),
        },
        (None, None) => Extent {
            cx: px_w as i64 * EMU_PER_PIXEL,
            cy: px_h as i64 * EMU_PER_PIXEL,
        },
    }
}

/// Dispatch a classified payload to its resolver.
pub async fn resolve(
    payload: &Payload,
    token: PlacementToken,
    fetcher: &dyn AssetFetcher,
) -> Result<EmbeddedObject, ResolveError> {
    match payload {
        Payload::Image(image) => image::resolve(image, token, fetcher).await,
        Payload::Formula(formula) => formula::resolve(formula, token),
        Payload::Qr(qr) => qr::resolve(qr, token),
    }
}

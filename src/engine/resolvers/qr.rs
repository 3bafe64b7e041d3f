//! QR resolver: encode at level H and rasterize to a grayscale PNG.

use log::debug;
use qrcode::{Color, EcLevel, QrCode};

use super::mm_to_emu;
use crate::engine::classifier::effective_dimension;
use crate::engine::value::{
    ContentFormat, EmbeddedObject, Extent, ObjectKind, PlacementToken, QrPayload,
};
use crate::engine::ResolveError;

pub const DEFAULT_SIZE_MM: f64 = 30.0;
const MODULE_PX: usize = 8;
const QUIET_ZONE: usize = 4;

pub fn resolve(payload: &QrPayload, token: PlacementToken) -> Result<EmbeddedObject, ResolveError> {
    let len = payload.data.len();
    let code = QrCode::with_error_correction_level(payload.data.as_bytes(), EcLevel::H)
        .map_err(|e| ResolveError::QrEncoding {
            len,
            reason: e.to_string(),
        })?;
    debug!(
        "QR {} encoded {} bytes into {:?}",
        token,
        len,
        code.version()
    );

    let content = rasterize(&code)?;
    let extent = qr_extent(
        effective_dimension(payload.width),
        effective_dimension(payload.height),
    );

    Ok(EmbeddedObject {
        kind: ObjectKind::Image,
        format: ContentFormat::Png,
        content,
        extent: Some(extent),
        token,
    })
}

/// QR symbols are square: a single given side is used for both.
fn qr_extent(width_mm: Option<f64>, height_mm: Option<f64>) -> Extent {
    let (w, h) = match (width_mm, height_mm) {
        (Some(w), Some(h)) => (w, h),
        (Some(side), None) | (None, Some(side)) => (side, side),
        (None, None) => (DEFAULT_SIZE_MM, DEFAULT_SIZE_MM),
    };
    Extent {
        cx: mm_to_emu(w),
        cy: mm_to_emu(h),
    }
}

fn rasterize(code: &QrCode) -> Result<Vec<u8>, ResolveError> {
    let modules = code.width();
    let colors = code.to_colors();
    let side = (modules + 2 * QUIET_ZONE) * MODULE_PX;

    let mut pixels = vec![255u8; side * side];
    for (idx, color) in colors.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let x0 = (idx % modules + QUIET_ZONE) * MODULE_PX;
        let y0 = (idx / modules + QUIET_ZONE) * MODULE_PX;
        for y in y0..y0 + MODULE_PX {
            pixels[y * side + x0..y * side + x0 + MODULE_PX].fill(0);
        }
    }

    encode_grayscale_png(side as u32, side as u32, &pixels)
}

/// Encode 8-bit grayscale pixels as PNG.
pub fn encode_grayscale_png(width: u32, height: u32, pixels: &[u8]) -> Result<Vec<u8>, ResolveError> {
    let encoding_error = |e: png::EncodingError| ResolveError::Raster(e.to_string());

    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, width, height);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header().map_err(encoding_error)?;
    writer.write_image_data(pixels).map_err(encoding_error)?;
    writer.finish().map_err(encoding_error)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &str, width: Option<f64>, height: Option<f64>) -> QrPayload {
        QrPayload {
            data: data.to_string(),
            width,
            height,
        }
    }

    #[test]
    fn test_default_size_is_30mm_square() {
        let object = resolve(&payload("https://example.com", None, None), PlacementToken(3)).unwrap();
        assert_eq!(object.format, ContentFormat::Png);
        assert_eq!(object.token, PlacementToken(3));
        assert_eq!(object.extent, Some(Extent { cx: 1_080_000, cy: 1_080_000 }));
    }

    #[test]
    fn test_single_dimension_applies_to_both_sides() {
        let object = resolve(&payload("abc", Some(20.0), None), PlacementToken(0)).unwrap();
        assert_eq!(object.extent, Some(Extent { cx: 720_000, cy: 720_000 }));

        let object = resolve(&payload("abc", Some(0.0), Some(15.0)), PlacementToken(0)).unwrap();
        assert_eq!(object.extent, Some(Extent { cx: 540_000, cy: 540_000 }));
    }

    #[test]
    fn test_raster_has_quiet_zone_and_module_scale() {
        let object = resolve(&payload("hello", None, None), PlacementToken(0)).unwrap();
        let size = imagesize::blob_size(&object.content).unwrap();

        // Version 1 is 21 modules wide.
        let side = (21 + 2 * QUIET_ZONE) * MODULE_PX;
        assert_eq!(size.width, side);
        assert_eq!(size.height, side);
    }

    #[test]
    fn test_over_capacity_fails() {
        // Version 40-H holds at most 1273 bytes.
        let data = "x".repeat(1274);
        let err = resolve(&payload(&data, None, None), PlacementToken(0)).unwrap_err();
        match err {
            ResolveError::QrEncoding { len, .. } => assert_eq!(len, 1274),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_capacity_boundary_fits() {
        let data = "x".repeat(1273);
        assert!(resolve(&payload(&data, None, None), PlacementToken(0)).is_ok());
    }
}

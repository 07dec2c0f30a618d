//! RGB <-> sRGB <-> CIE XYZ <-> CIE L*a*b* conversions, plus the DICOM
//! "recommended absent pixel CIE-L*a*b*" 16-bit tag encoding.
//!
//! Grounded on the core specification's §4.8 color science component: a
//! standard D65-illuminant pipeline used only to tag the background color
//! of a pyramid's missing/absent tiles in the output DICOM dataset. None of
//! this is on the hot tile-transcoding path, so it favors straightforward
//! float arithmetic over the fixed-point tricks used in `pixel::codec`'s
//! YCbCr conversion.

/// CIE standard illuminant D65 reference white, 2-degree observer.
pub const REFERENCE_WHITE: (f64, f64, f64) = (95.0489, 100.0, 108.8840);

const DELTA: f64 = 6.0 / 29.0;

/// An 8-bit RGB triple, the unit the rest of the pipeline passes background
/// colors around as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb8 { r, g, b }
    }
}

/// `RGB -> sRGB`: normalize 8-bit components to `[0, 1]`.
fn rgb_to_srgb(rgb: Rgb8) -> (f64, f64, f64) {
    (
        rgb.r as f64 / 255.0,
        rgb.g as f64 / 255.0,
        rgb.b as f64 / 255.0,
    )
}

/// `sRGB -> RGB`: denormalize back to 8-bit, rounding and clamping.
fn srgb_to_rgb(srgb: (f64, f64, f64)) -> Rgb8 {
    let to_u8 = |c: f64| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb8::new(to_u8(srgb.0), to_u8(srgb.1), to_u8(srgb.2))
}

/// Inverse sRGB gamma (linearize), per the sRGB standard piecewise curve.
fn srgb_gamma_expand(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Forward sRGB gamma (encode), the inverse of [`srgb_gamma_expand`].
fn srgb_gamma_compress(c: f64) -> f64 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// sRGB -> CIE XYZ, scaled so `Y` is in `[0, 100]` to match [`REFERENCE_WHITE`].
fn srgb_to_xyz(srgb: (f64, f64, f64)) -> (f64, f64, f64) {
    let (r, g, b) = (
        srgb_gamma_expand(srgb.0),
        srgb_gamma_expand(srgb.1),
        srgb_gamma_expand(srgb.2),
    );

    let x = (0.4124564 * r + 0.3575761 * g + 0.1804375 * b) * 100.0;
    let y = (0.2126729 * r + 0.7151522 * g + 0.0721750 * b) * 100.0;
    let z = (0.0193339 * r + 0.1191920 * g + 0.9503041 * b) * 100.0;
    (x, y, z)
}

/// CIE XYZ -> sRGB, the inverse 3x3 matrix followed by gamma encoding.
fn xyz_to_srgb(xyz: (f64, f64, f64)) -> (f64, f64, f64) {
    let (x, y, z) = (xyz.0 / 100.0, xyz.1 / 100.0, xyz.2 / 100.0);

    let r = 3.2404542 * x - 1.5371385 * y - 0.4985314 * z;
    let g = -0.9692660 * x + 1.8760108 * y + 0.0415560 * z;
    let b = 0.0556434 * x - 0.2040259 * y + 1.0572252 * z;

    (
        srgb_gamma_compress(r).clamp(0.0, 1.0),
        srgb_gamma_compress(g).clamp(0.0, 1.0),
        srgb_gamma_compress(b).clamp(0.0, 1.0),
    )
}

/// CIELAB nonlinearity `f(t)`, `delta = 6/29`.
fn lab_f(t: f64) -> f64 {
    if t > DELTA.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
    }
}

/// CIELAB inverse nonlinearity `f^-1(t)`.
fn lab_f_inv(t: f64) -> f64 {
    if t > DELTA {
        t.powi(3)
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

/// CIE XYZ -> CIE L*a*b*, relative to [`REFERENCE_WHITE`].
fn xyz_to_lab(xyz: (f64, f64, f64)) -> (f64, f64, f64) {
    let (xn, yn, zn) = REFERENCE_WHITE;
    let fx = lab_f(xyz.0 / xn);
    let fy = lab_f(xyz.1 / yn);
    let fz = lab_f(xyz.2 / zn);

    let l = 116.0 * fy - 16.0;
    let a = 500.0 * (fx - fy);
    let b = 200.0 * (fy - fz);
    (l, a, b)
}

/// CIE L*a*b* -> CIE XYZ, the inverse of [`xyz_to_lab`].
fn lab_to_xyz(lab: (f64, f64, f64)) -> (f64, f64, f64) {
    let (xn, yn, zn) = REFERENCE_WHITE;
    let fy = (lab.0 + 16.0) / 116.0;
    let fx = fy + lab.1 / 500.0;
    let fz = fy - lab.2 / 200.0;

    (xn * lab_f_inv(fx), yn * lab_f_inv(fy), zn * lab_f_inv(fz))
}

/// `RGB -> CIE L*a*b*` by chaining `RGB -> sRGB -> XYZ -> L*a*b*`.
pub fn rgb_to_lab(rgb: Rgb8) -> (f64, f64, f64) {
    xyz_to_lab(srgb_to_xyz(rgb_to_srgb(rgb)))
}

/// `CIE L*a*b* -> RGB` by chaining `L*a*b* -> XYZ -> sRGB -> RGB`.
pub fn lab_to_rgb(lab: (f64, f64, f64)) -> Rgb8 {
    srgb_to_rgb(xyz_to_srgb(lab_to_xyz(lab)))
}

/// Encode a CIE L*a*b* triple into the DICOM "recommended absent pixel CIE
/// L*a*b*" tag's three 16-bit unsigned values.
///
/// `L` in `[0, 100]` maps linearly onto `[0, 0xFFFF]`. `a`/`b` in
/// `[-128, 127]` map so that `-128 -> 0`, `0 -> 0x8080`, `127 -> 0xFFFF`
/// (the DICOM PS3.3 C.10.7.1.1 convention for this tag).
pub fn encode_dicom_lab(lab: (f64, f64, f64)) -> (u16, u16, u16) {
    let l = (lab.0.clamp(0.0, 100.0) / 100.0 * 0xFFFF as f64).round() as u16;
    let encode_ab = |v: f64| -> u16 {
        let v = v.clamp(-128.0, 127.0);
        (((v + 128.0) / 255.0) * 0xFFFF as f64).round() as u16
    };
    (l, encode_ab(lab.1), encode_ab(lab.2))
}

/// Decode the DICOM-encoded 16-bit triple back into CIE L*a*b*, the inverse
/// of [`encode_dicom_lab`].
pub fn decode_dicom_lab(values: (u16, u16, u16)) -> (f64, f64, f64) {
    let l = values.0 as f64 / 0xFFFF as f64 * 100.0;
    let decode_ab = |v: u16| -> f64 { (v as f64 / 0xFFFF as f64) * 255.0 - 128.0 };
    (l, decode_ab(values.1), decode_ab(values.2))
}

/// Parse the DICOM tag's `\`-separated three-value string form (as it
/// appears in a dataset dump or a JSON template) into the 16-bit triple.
pub fn parse_dicom_lab_string(s: &str) -> Option<(u16, u16, u16)> {
    let mut parts = s.split('\\');
    let l = parts.next()?.trim().parse::<u16>().ok()?;
    let a = parts.next()?.trim().parse::<u16>().ok()?;
    let b = parts.next()?.trim().parse::<u16>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((l, a, b))
}

/// Format the 16-bit triple back into the `\`-separated DICOM string form.
pub fn format_dicom_lab_string(values: (u16, u16, u16)) -> String {
    format!("{}\\{}\\{}", values.0, values.1, values.2)
}

/// Convert an RGB background color directly to the DICOM-encoded triple,
/// the composition the top-level pipeline actually calls.
pub fn rgb_to_dicom_lab(rgb: Rgb8) -> (u16, u16, u16) {
    encode_dicom_lab(rgb_to_lab(rgb))
}

/// Convert a DICOM-encoded triple back to an RGB background color, used
/// when reading the "recommended absent pixel" tag from a source pyramid.
pub fn dicom_lab_to_rgb(values: (u16, u16, u16)) -> Rgb8 {
    lab_to_rgb(decode_dicom_lab(values))
}

use fixed::types::I32F32;

// Pixel length in fixed point. Layout math stays deterministic across
// platforms because every value is quantized to 1/1000 px.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Px(I32F32);

impl Px {
    pub const ZERO: Px = Px(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Px {
        if !value.is_finite() {
            return Px::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Px::from_milli_i64(milli)
    }

    pub fn from_i32(value: i32) -> Px {
        Px::from_milli_i64((value as i64) * 1000)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn max(self, other: Px) -> Px {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Px) -> Px {
        if self <= other { self } else { other }
    }

    pub fn from_milli_i64(milli: i64) -> Px {
        Px::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Px {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Px(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Px {
    type Output = Px;
    fn add(self, rhs: Px) -> Px {
        Px::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

impl std::ops::AddAssign for Px {
    fn add_assign(&mut self, rhs: Px) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Px {
    type Output = Px;
    fn sub(self, rhs: Px) -> Px {
        Px::from_milli_i128(self.to_milli_i64() as i128 - rhs.to_milli_i64() as i128)
    }
}

impl std::ops::SubAssign for Px {
    fn sub_assign(&mut self, rhs: Px) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<i32> for Px {
    type Output = Px;
    fn mul(self, rhs: i32) -> Px {
        let milli = self.to_milli_i64() as i128;
        Px::from_milli_i128(milli.saturating_mul(rhs as i128))
    }
}

impl std::ops::Mul<f32> for Px {
    type Output = Px;
    fn mul(self, rhs: f32) -> Px {
        if !rhs.is_finite() {
            return Px::ZERO;
        }
        Px::from_f32(self.to_f32() * rhs)
    }
}

impl std::iter::Sum for Px {
    fn sum<I: Iterator<Item = Px>>(iter: I) -> Px {
        iter.fold(Px::ZERO, |acc, v| acc + v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn note_page() -> Self {
        Self::new(1242, 1660)
    }

    pub fn aspect_ratio(self) -> f32 {
        if self.height == 0 {
            return 1.0;
        }
        self.width as f32 / self.height as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }

    pub fn from_hex(raw: &str) -> Option<Self> {
        let hex = raw.trim().trim_start_matches('#');
        let expand = |c: u8| -> Option<u8> {
            let v = (c as char).to_digit(16)? as u8;
            Some(v * 17)
        };
        match hex.len() {
            3 => {
                let bytes = hex.as_bytes();
                Some(Self::rgb8(
                    expand(bytes[0])?,
                    expand(bytes[1])?,
                    expand(bytes[2])?,
                ))
            }
            6 => {
                let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
                let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
                let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
                Some(Self::rgb8(r, g, b))
            }
            _ => None,
        }
    }
}

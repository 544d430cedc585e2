//! CPU image storage for the software backend.

use render_api::{BlendMode, FilterMode, PixelFormat};

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub filter: FilterMode,
    pub pixels: Vec<[f32; 4]>,
}

fn quantize(v: f32) -> f32 {
    (v.clamp(0.0, 1.0) * 255.0).round() / 255.0
}

impl Image {
    pub fn new(width: u32, height: u32, format: PixelFormat, filter: FilterMode) -> Self {
        Self {
            width,
            height,
            format,
            filter,
            pixels: vec![[0.0; 4]; (width as usize) * (height as usize)],
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + x as usize
    }

    /// Texel at integer coordinates, clamped to the edge.
    pub fn get(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.pixels[self.index(x, y)]
    }

    /// Store a value, applying the storage precision of the format.
    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let stored = match self.format {
            PixelFormat::Standard => value.map(quantize),
            PixelFormat::Hdr => value.map(|v| v.max(0.0)),
        };
        let i = self.index(x, y);
        self.pixels[i] = stored;
    }

    pub fn blend(&mut self, x: u32, y: u32, src: [f32; 4], mode: BlendMode) {
        let dst = self.pixels[self.index(x, y)];
        let out = match mode {
            BlendMode::Replace => src,
            BlendMode::Additive => [dst[0] + src[0], dst[1] + src[1], dst[2] + src[2], dst[3] + src[3]],
            BlendMode::AlphaOver => {
                let a = src[3].clamp(0.0, 1.0);
                [
                    src[0] * a + dst[0] * (1.0 - a),
                    src[1] * a + dst[1] * (1.0 - a),
                    src[2] * a + dst[2] * (1.0 - a),
                    a + dst[3] * (1.0 - a),
                ]
            }
        };
        self.set(x, y, out);
    }

    pub fn clear(&mut self, color: [f32; 4]) {
        for y in 0..self.height {
            for x in 0..self.width {
                self.set(x, y, color);
            }
        }
    }

    /// Sample with clamp-to-edge addressing using this image's filter.
    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let fx = uv[0] * self.width as f32;
        let fy = uv[1] * self.height as f32;
        match self.filter {
            FilterMode::Nearest => self.get(fx.floor() as i64, fy.floor() as i64),
            FilterMode::Bilinear => {
                let x = fx - 0.5;
                let y = fy - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let tx = x - x0;
                let ty = y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let a = self.get(x0, y0);
                let b = self.get(x0 + 1, y0);
                let c = self.get(x0, y0 + 1);
                let d = self.get(x0 + 1, y0 + 1);
                let mut out = [0.0f32; 4];
                for i in 0..4 {
                    let top = a[i] + (b[i] - a[i]) * tx;
                    let bottom = c[i] + (d[i] - c[i]) * tx;
                    out[i] = top + (bottom - top) * ty;
                }
                out
            }
        }
    }

    /// Like [`Image::sample`] but transparent black outside `[0, 1]`.
    pub fn sample_bordered(&self, uv: [f32; 2]) -> [f32; 4] {
        if uv[0] < 0.0 || uv[0] > 1.0 || uv[1] < 0.0 || uv[1] > 1.0 {
            return [0.0; 4];
        }
        self.sample(uv)
    }

    /// Largest per-channel absolute difference to an image of the same size.
    pub fn max_abs_diff(&self, other: &Image) -> f32 {
        self.pixels
            .iter()
            .zip(&other.pixels)
            .flat_map(|(a, b)| (0..4).map(move |i| (a[i] - b[i]).abs()))
            .fold(0.0, f32::max)
    }

    /// 8-bit RGBA bytes, row-major, for export.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| p.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_hits_texel_centres_exactly() {
        let mut img = Image::new(4, 2, PixelFormat::Hdr, FilterMode::Bilinear);
        img.set(1, 0, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(img.sample([1.5 / 4.0, 0.5 / 2.0]), [1.0, 0.5, 0.25, 1.0]);
        let mid = img.sample([2.0 / 4.0, 0.5 / 2.0]);
        assert!((mid[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn standard_format_quantizes_and_clamps() {
        let mut img = Image::new(2, 2, PixelFormat::Standard, FilterMode::Nearest);
        img.set(0, 0, [2.0, -1.0, 0.5, 1.0]);
        let p = img.get(0, 0);
        assert_eq!(p[0], 1.0);
        assert_eq!(p[1], 0.0);
        assert!((p[2] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn blend_modes() {
        let mut img = Image::new(1, 1, PixelFormat::Hdr, FilterMode::Nearest);
        img.set(0, 0, [0.2, 0.2, 0.2, 1.0]);
        img.blend(0, 0, [0.5, 0.0, 0.0, 0.5], BlendMode::Additive);
        assert!((img.get(0, 0)[0] - 0.7).abs() < 1e-6);
        img.blend(0, 0, [0.0, 1.0, 0.0, 0.5], BlendMode::AlphaOver);
        assert!((img.get(0, 0)[1] - 0.6).abs() < 1e-6);
    }
}

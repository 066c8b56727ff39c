//! Minimal row-major 2D field used for segmentations, feature channels,
//! validity masks and result maps.

use image::{ImageBuffer, Luma};

/// Dense `width × height` grid of values stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Field<T> {
    width: usize,
    height: usize,
    data: Vec<T>,
}

impl<T: Clone> Field<T> {
    /// Create a field filled with `value`.
    pub fn new(width: usize, height: usize, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }
}

impl<T> Field<T> {
    /// Create a field by evaluating `f(x, y)` at every cell.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap an existing row-major buffer. Returns `None` when the length
    /// does not match `width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<T>) -> Option<Self> {
        (data.len() == width * height).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        &self.data[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        &mut self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: T) {
        self.data[y * self.width + x] = value;
    }

    /// Row-major view of all values.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Apply `f` to every value, producing a new field of the same size.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Field<U> {
        Field {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(f).collect(),
        }
    }
}

impl<T: Copy> Field<T> {
    /// Value at `(x, y)` with coordinates clamped into the field.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> T {
        let cx = x.clamp(0, self.width as i64 - 1) as usize;
        let cy = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[cy * self.width + cx]
    }
}

// ── image interop ──────────────────────────────────────────────────────────

impl Field<f32> {
    /// Convert to a 16-bit grayscale image, mapping `value * scale` to the
    /// pixel value with saturation.
    pub fn to_luma16(&self, scale: f32) -> ImageBuffer<Luma<u16>, Vec<u16>> {
        ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
            let v = (*self.get(x as usize, y as usize) * scale).round();
            Luma([v.clamp(0.0, u16::MAX as f32) as u16])
        })
    }
}

impl<P> From<&ImageBuffer<Luma<P>, Vec<P>>> for Field<P>
where
    P: image::Primitive,
{
    fn from(img: &ImageBuffer<Luma<P>, Vec<P>>) -> Self {
        let (w, h) = img.dimensions();
        Field::from_fn(w as usize, h as usize, |x, y| {
            img.get_pixel(x as u32, y as u32)[0]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fn_is_row_major() {
        let f = Field::from_fn(3, 2, |x, y| (x + 10 * y) as u32);
        assert_eq!(f.as_slice(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(*f.get(2, 1), 12);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(Field::from_vec(2, 2, vec![0u8; 3]).is_none());
        assert!(Field::from_vec(2, 2, vec![0u8; 4]).is_some());
    }

    #[test]
    fn clamped_access_stays_inside() {
        let f = Field::from_fn(4, 3, |x, y| (x, y));
        assert_eq!(f.get_clamped(-5, 1), (0, 1));
        assert_eq!(f.get_clamped(9, 9), (3, 2));
    }

    #[test]
    fn luma_round_trip_keeps_values() {
        let f = Field::from_fn(4, 2, |x, y| (x + 4 * y) as f32);
        let img = f.to_luma16(10.0);
        assert_eq!(img.get_pixel(3, 1)[0], 70);
        let back: Field<u16> = Field::from(&img);
        assert_eq!(*back.get(1, 0), 10);
    }
}

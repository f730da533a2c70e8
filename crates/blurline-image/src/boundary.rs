use crate::image::Image;

/// How reads outside of an image are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BoundaryPolicy<T> {
    /// Redirect to the nearest in-range coordinate (clamp-to-edge).
    ///
    /// Example: ...d c b a | a a a a...
    #[default]
    RepeatEdge,

    /// Every outside read yields the same constant value.
    ///
    /// Example: ...d c b a | v v v v...
    Constant(T),

    /// Mirror the image, repeating the edge pixel.
    ///
    /// Example: ...d c b a | a b c d...
    Reflect,

    /// Wrap around to the opposite side.
    ///
    /// Example: ...d c b a | w x y z...
    Wrap,
}

impl<T> BoundaryPolicy<T> {
    /// Maps index `i` to a valid index within `[0, len)`.
    ///
    /// Returns `None` for [`BoundaryPolicy::Constant`] when `i` is outside.
    #[inline]
    pub fn map_index(&self, i: i64, len: usize) -> Option<usize> {
        let len = len as i64;
        if (0..len).contains(&i) {
            return Some(i as usize);
        }
        let mapped = match self {
            BoundaryPolicy::RepeatEdge => i.clamp(0, len - 1),
            BoundaryPolicy::Constant(_) => return None,
            BoundaryPolicy::Reflect => {
                let m = i.rem_euclid(2 * len);
                if m < len {
                    m
                } else {
                    2 * len - 1 - m
                }
            }
            BoundaryPolicy::Wrap => i.rem_euclid(len),
        };
        Some(mapped as usize)
    }
}

/// An image whose reads are defined for every integer coordinate.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryBuffer<'a, T> {
    image: &'a Image<T>,
    policy: BoundaryPolicy<T>,
}

impl<'a, T: Copy> BoundaryBuffer<'a, T> {
    /// Wrap an image with the given boundary policy.
    pub fn new(image: &'a Image<T>, policy: BoundaryPolicy<T>) -> Self {
        Self { image, policy }
    }

    /// Read the pixel at `(x, y)`; total over all integer coordinates.
    #[inline]
    pub fn read(&self, x: i64, y: i64) -> T {
        let mx = self.policy.map_index(x, self.image.width());
        let my = self.policy.map_index(y, self.image.height());
        match (mx, my, self.policy) {
            (Some(mx), Some(my), _) => self.image.as_slice()[self.image.offset(mx, my)],
            (_, _, BoundaryPolicy::Constant(val)) => val,
            // only the constant policy leaves an index unmapped
            _ => self.image.as_slice()[0],
        }
    }
}

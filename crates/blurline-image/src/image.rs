use crate::error::ImageError;

/// Image size in pixels
///
/// A struct to represent the size of an image in pixels.
///
/// # Examples
///
/// ```
/// use blurline_image::ImageSize;
///
/// let image_size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(image_size.width, 10);
/// assert_eq!(image_size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ImageSize {{ width: {}, height: {} }}",
            self.width, self.height
        )
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

/// A single-channel 2-D image with explicit strides.
///
/// The pixel at `(x, y)` lives at `data[x * strides[0] + y * strides[1]]`.
/// Images built with [`Image::new`] are x-fastest (`strides == [1, width]`),
/// which matches the column-major ("Fortran") order of the reference pipeline
/// where the first coordinate is the innermost one in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct Image<T> {
    size: ImageSize,
    strides: [usize; 2],
    data: Vec<T>,
}

impl<T> Image<T> {
    /// Create a new image from pixel data stored x-fastest.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The pixel data of the image.
    ///
    /// # Errors
    ///
    /// If the size is empty or the length of the pixel data does not match the
    /// image size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use blurline_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8>::new(
    ///     ImageSize {
    ///         width: 10,
    ///         height: 20,
    ///     },
    ///     vec![0u8; 10 * 20],
    /// ).unwrap();
    ///
    /// assert_eq!(image.width(), 10);
    /// assert_eq!(image.height(), 20);
    /// assert_eq!(image.strides(), [1, 10]);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if data.len() != size.width * size.height {
            return Err(ImageError::InvalidDataLength(
                data.len(),
                size.width * size.height,
            ));
        }
        Self::from_parts(size, data, [1, size.width])
    }

    /// Create a new image from pixel data stored y-fastest (`strides == [height, 1]`).
    pub fn from_vec_y_fastest(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if data.len() != size.width * size.height {
            return Err(ImageError::InvalidDataLength(
                data.len(),
                size.width * size.height,
            ));
        }
        Self::from_parts(size, data, [size.height, 1])
    }

    /// Create a new image from pixel data and arbitrary strides.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the image in pixels.
    /// * `data` - The backing storage; may be longer than the addressed extent.
    /// * `strides` - Element distance between neighbours along x and y.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is empty, a stride is zero, two coordinates
    /// would share one element, or `data` is too short.
    pub fn from_parts(
        size: ImageSize,
        data: Vec<T>,
        strides: [usize; 2],
    ) -> Result<Self, ImageError> {
        if size.width == 0 || size.height == 0 {
            return Err(ImageError::EmptyImage(size.width, size.height));
        }

        let [sx, sy] = strides;
        if sx == 0 || sy == 0 {
            return Err(ImageError::ZeroStride(sx, sy));
        }

        // one axis must step over the whole span of the other one
        let disjoint = size.width == 1
            || size.height == 1
            || sy >= size.width * sx
            || sx >= size.height * sy;
        if !disjoint {
            return Err(ImageError::AliasingStrides(
                sx,
                sy,
                size.width,
                size.height,
            ));
        }

        let required = (size.width - 1) * sx + (size.height - 1) * sy + 1;
        if data.len() < required {
            return Err(ImageError::InvalidDataLength(data.len(), required));
        }

        Ok(Self {
            size,
            strides,
            data,
        })
    }

    /// Create a new x-fastest image with the given size filled with `val`.
    ///
    /// # Examples
    ///
    /// ```
    /// use blurline_image::{Image, ImageSize};
    ///
    /// let image = Image::<u8>::from_size_val(
    ///     ImageSize {
    ///         width: 10,
    ///         height: 20,
    ///     },
    ///     0u8,
    /// ).unwrap();
    ///
    /// assert_eq!(image.size().width, 10);
    /// assert_eq!(image.size().height, 20);
    /// ```
    pub fn from_size_val(size: ImageSize, val: T) -> Result<Self, ImageError>
    where
        T: Clone,
    {
        Image::new(size, vec![val; size.width * size.height])
    }

    /// Create an image with the same size and memory layout as `self`, filled with `val`.
    pub fn from_layout_of<U>(other: &Image<U>, val: T) -> Result<Self, ImageError>
    where
        T: Clone,
    {
        let [sx, sy] = other.strides;
        let len = (other.size.width - 1) * sx + (other.size.height - 1) * sy + 1;
        Self::from_parts(other.size, vec![val; len], other.strides)
    }

    /// Get the size of the image in pixels.
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Get the width of the image in pixels.
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Get the height of the image in pixels.
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Get the number of columns of the image.
    pub fn cols(&self) -> usize {
        self.width()
    }

    /// Get the number of rows of the image.
    pub fn rows(&self) -> usize {
        self.height()
    }

    /// Get the element strides along x and y.
    pub fn strides(&self) -> [usize; 2] {
        self.strides
    }

    /// Get the backing storage.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Get the backing storage mutably.
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Consume the image and return its backing storage.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Offset of the pixel `(x, y)` in the backing storage. No bounds checks.
    #[inline]
    pub fn offset(&self, x: usize, y: usize) -> usize {
        x * self.strides[0] + y * self.strides[1]
    }

    /// Get a reference to the pixel at `(x, y)` if it is inside the image.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        self.data.get(self.offset(x, y))
    }

    /// Set the pixel at `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the coordinate is outside the image.
    pub fn set(&mut self, x: usize, y: usize, val: T) -> Result<(), ImageError> {
        if x >= self.size.width || y >= self.size.height {
            return Err(ImageError::PixelIndexOutOfBounds(
                x,
                y,
                self.size.width,
                self.size.height,
            ));
        }
        let offset = self.offset(x, y);
        self.data[offset] = val;
        Ok(())
    }

    /// Collect the pixels in x-fastest order regardless of the storage layout.
    pub fn to_vec_x_fastest(&self) -> Vec<T>
    where
        T: Copy,
    {
        let mut out = Vec::with_capacity(self.size.width * self.size.height);
        for y in 0..self.size.height {
            for x in 0..self.size.width {
                out.push(self.data[self.offset(x, y)]);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::image::{Image, ImageError, ImageSize};

    #[test]
    fn image_size() {
        let image_size = ImageSize {
            width: 10,
            height: 20,
        };
        assert_eq!(image_size.width, 10);
        assert_eq!(image_size.height, 20);
        assert_eq!(ImageSize::from([10, 20]), image_size);
    }

    #[test]
    fn image_smoke() -> Result<(), ImageError> {
        let image = Image::<u8>::new([10, 20].into(), vec![0u8; 10 * 20])?;
        assert_eq!(image.size().width, 10);
        assert_eq!(image.size().height, 20);
        assert_eq!(image.cols(), 10);
        assert_eq!(image.rows(), 20);
        Ok(())
    }

    #[test]
    fn image_layouts_agree() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 3,
            height: 2,
        };
        let x_fastest = Image::new(size, vec![1u8, 2, 3, 4, 5, 6])?;
        let y_fastest = Image::from_vec_y_fastest(size, vec![1u8, 4, 2, 5, 3, 6])?;

        assert_eq!(x_fastest.get(2, 1), Some(&6));
        assert_eq!(y_fastest.get(2, 1), Some(&6));
        assert_eq!(y_fastest.get(1, 0), Some(&2));
        assert_eq!(x_fastest.to_vec_x_fastest(), y_fastest.to_vec_x_fastest());
        Ok(())
    }

    #[test]
    fn image_padded_rows() -> Result<(), ImageError> {
        // two pixels of padding at the end of every row
        let size = ImageSize {
            width: 2,
            height: 2,
        };
        let image = Image::from_parts(size, vec![1u8, 2, 0, 0, 3, 4], [1, 4])?;
        assert_eq!(image.to_vec_x_fastest(), vec![1, 2, 3, 4]);

        let like = Image::from_layout_of(&image, 9u8)?;
        assert_eq!(like.strides(), [1, 4]);
        assert_eq!(like.to_vec_x_fastest(), vec![9, 9, 9, 9]);
        Ok(())
    }

    #[test]
    fn image_invalid_shapes() {
        let size = ImageSize {
            width: 3,
            height: 3,
        };
        assert_eq!(
            Image::<u8>::new([0, 3].into(), vec![]),
            Err(ImageError::EmptyImage(0, 3))
        );
        assert_eq!(
            Image::new(size, vec![0u8; 8]),
            Err(ImageError::InvalidDataLength(8, 9))
        );
        assert_eq!(
            Image::from_parts(size, vec![0u8; 9], [0, 3]),
            Err(ImageError::ZeroStride(0, 3))
        );
        assert_eq!(
            Image::from_parts(size, vec![0u8; 9], [1, 2]),
            Err(ImageError::AliasingStrides(1, 2, 3, 3))
        );
        assert_eq!(
            Image::from_parts(size, vec![0u8; 9], [1, 4]),
            Err(ImageError::InvalidDataLength(9, 11))
        );
    }

    #[test]
    fn image_set_get() -> Result<(), ImageError> {
        let mut image = Image::from_size_val([2, 2].into(), 0u8)?;
        image.set(1, 0, 7)?;
        assert_eq!(image.get(1, 0), Some(&7));
        assert_eq!(image.get(2, 0), None);
        assert_eq!(
            image.set(0, 2, 1),
            Err(ImageError::PixelIndexOutOfBounds(0, 2, 2, 2))
        );
        Ok(())
    }
}

use serde::{Deserialize, Serialize};

use crate::{
    error::{ModelError, Result},
    Float,
};

/// Size of a 3-D volume, indexed (depth, width, height).
///
/// Storage is row-major with height varying fastest, so the unit
/// `(d, x, y)` lives at `(d * width + x) * height + y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub depth: usize,
    pub width: usize,
    pub height: usize,
}

impl Extent {
    pub fn new(depth: usize, width: usize, height: usize) -> Self {
        Self {
            depth,
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.depth * self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self, d: usize, x: usize, y: usize) -> usize {
        debug_assert!(d < self.depth && x < self.width && y < self.height);
        (d * self.width + x) * self.height + y
    }

    /// Like [`Extent::index`], but fails for coordinates outside the extent.
    pub fn checked_index(&self, d: usize, x: usize, y: usize) -> Result<usize> {
        if d < self.depth && x < self.width && y < self.height {
            Ok(self.index(d, x, y))
        } else {
            Err(ModelError::OutOfRange {
                d,
                x,
                y,
                extent: *self,
            })
        }
    }

    /// Fails with a shape mismatch on the first dimension that differs.
    pub fn ensure_matches(&self, what: &'static str, actual: Extent) -> Result<()> {
        ModelError::check(what, self.depth, actual.depth)?;
        ModelError::check(what, self.width, actual.width)?;
        ModelError::check(what, self.height, actual.height)
    }

    pub fn coords(&self, index: usize) -> (usize, usize, usize) {
        debug_assert!(index < self.len());
        let y = index % self.height;
        let rest = index / self.height;
        (rest / self.width, rest % self.width, y)
    }
}

/// Whether the contents of a buffer may be read.
///
/// A kernel output is `Discarded` from the moment a pass claims it until
/// the pass has written every unit; the old values are never observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Residency {
    #[default]
    Valid,
    Discarded,
}

// Volume is the buffer behind every layer state: a dense 3-D array of
// activations together with its residency. All buffers of one data layer
// share the same extent and are never resized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    extent: Extent,
    w: Vec<Float>,

    #[serde(skip)]
    residency: Residency,
}

impl Volume {
    pub fn with_constant(extent: Extent, constant: Float) -> Self {
        Self {
            extent,
            w: vec![constant; extent.len()],
            residency: Residency::Valid,
        }
    }

    pub fn zeros(extent: Extent) -> Self {
        Self::with_constant(extent, 0.0)
    }

    pub fn from_values(extent: Extent, values: Vec<Float>) -> Result<Self> {
        ModelError::check("volume values", extent.len(), values.len())?;
        Ok(Self {
            extent,
            w: values,
            residency: Residency::Valid,
        })
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }
    pub fn depth(&self) -> usize {
        self.extent.depth
    }
    pub fn width(&self) -> usize {
        self.extent.width
    }
    pub fn height(&self) -> usize {
        self.extent.height
    }
    pub fn len(&self) -> usize {
        self.w.len()
    }
    pub fn is_empty(&self) -> bool {
        self.w.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.residency == Residency::Valid
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Reads one unit. Fails on a discarded volume, like [`Volume::as_slice`].
    pub fn get(&self, d: usize, x: usize, y: usize) -> Result<Float> {
        let index = self.extent.checked_index(d, x, y)?;
        Ok(self.as_slice()?[index])
    }

    pub fn set(&mut self, d: usize, x: usize, y: usize, value: Float) -> Result<()> {
        let index = self.extent.checked_index(d, x, y)?;
        self.w[index] = value;
        Ok(())
    }

    pub fn as_slice(&self) -> Result<&[Float]> {
        if self.is_valid() {
            Ok(&self.w)
        } else {
            Err(ModelError::StaleRead)
        }
    }

    pub fn to_vec(&self) -> Result<Vec<Float>> {
        self.as_slice().map(<[Float]>::to_vec)
    }

    /// Marks the contents for overwrite. Until the next sync every read
    /// fails with [`ModelError::StaleRead`].
    pub fn invalidate(&mut self) {
        self.residency = Residency::Discarded;
    }

    /// Publishes host-side writes so that parallel kernels observe them.
    pub fn sync_to_device(&mut self) {
        self.residency = Residency::Valid;
    }

    /// Makes the latest kernel results readable from the host. Fails if the
    /// buffer was invalidated and nothing has been written since.
    pub fn sync_from_device(&self) -> Result<()> {
        self.as_slice().map(|_| ())
    }

    /// Replaces the whole contents. Nothing of the previous state survives.
    pub fn replace(&mut self, values: &[Float]) -> Result<()> {
        ModelError::check("volume values", self.w.len(), values.len())?;

        self.invalidate();
        self.w.copy_from_slice(values);
        self.sync_to_device();
        Ok(())
    }

    pub fn copy_from(&mut self, other: &Volume) -> Result<()> {
        self.extent.ensure_matches("volume extent", other.extent)?;
        let values = other.as_slice()?;
        self.replace(values)
    }

    /// Claims the buffer as a write-only kernel output. The buffer stays
    /// discarded until [`Volume::sync_to_device`] is called.
    pub(crate) fn write_only(&mut self) -> &mut [Float] {
        self.invalidate();
        &mut self.w
    }

    /// Read-only view for a kernel capture list.
    pub(crate) fn read_only(&self) -> Result<&[Float]> {
        self.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::{Extent, Residency, Volume};
    use crate::ModelError;

    #[test]
    fn index_and_coords_agree() {
        let extent = Extent::new(2, 3, 4);
        for i in 0..extent.len() {
            let (d, x, y) = extent.coords(i);
            assert_eq!(extent.index(d, x, y), i);
        }
        assert_eq!(extent.index(1, 0, 0), 12);
        assert_eq!(extent.index(0, 1, 0), 4);
        assert_eq!(extent.index(0, 0, 1), 1);
    }

    #[test]
    fn replace_rejects_wrong_length() {
        let mut vol = Volume::zeros(Extent::new(1, 2, 2));
        let err = vol.replace(&[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            ModelError::ShapeMismatch {
                what: "volume values",
                expected: 4,
                actual: 3
            }
        );
        // untouched on failure
        assert_eq!(vol.as_slice().unwrap(), &[0.0; 4]);
    }

    #[test]
    fn replace_overwrites_everything() {
        let mut vol = Volume::with_constant(Extent::new(1, 2, 2), 7.0);
        vol.replace(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(vol.as_slice().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(vol.get(0, 1, 0), Ok(3.0));
    }

    #[test]
    fn invalidated_volume_cannot_be_read() {
        let mut vol = Volume::zeros(Extent::new(1, 1, 3));
        vol.invalidate();
        assert_eq!(vol.residency(), Residency::Discarded);
        assert_eq!(vol.as_slice().unwrap_err(), ModelError::StaleRead);
        assert_eq!(vol.sync_from_device().unwrap_err(), ModelError::StaleRead);

        vol.sync_to_device();
        assert!(vol.sync_from_device().is_ok());
    }

    #[test]
    fn get_never_returns_discarded_values() {
        let mut vol = Volume::with_constant(Extent::new(1, 2, 2), 7.0);
        vol.invalidate();
        for x in 0..2 {
            for y in 0..2 {
                assert_eq!(vol.get(0, x, y), Err(ModelError::StaleRead));
            }
        }

        vol.replace(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(vol.get(0, 1, 1), Ok(4.0));
    }

    #[test]
    fn out_of_range_units_are_rejected() {
        let mut vol = Volume::zeros(Extent::new(1, 2, 2));
        let outside = ModelError::OutOfRange {
            d: 0,
            x: 2,
            y: 0,
            extent: Extent::new(1, 2, 2),
        };
        assert_eq!(vol.get(0, 2, 0), Err(outside.clone()));
        assert_eq!(vol.set(0, 2, 0, 1.0), Err(outside));
        assert!(vol.get(1, 0, 0).is_err());
        assert!(vol.get(0, 0, 2).is_err());
    }

    #[test]
    fn copy_from_checks_extent() {
        let src = Volume::with_constant(Extent::new(2, 1, 2), 1.0);
        let mut same_len = Volume::zeros(Extent::new(1, 2, 2));
        assert!(same_len.copy_from(&src).is_err());

        let mut dst = Volume::zeros(Extent::new(2, 1, 2));
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.as_slice().unwrap(), &[1.0; 4]);
    }

    #[test]
    fn serde_keeps_extent_and_values() {
        let vol = Volume::from_values(Extent::new(1, 1, 2), vec![0.5, -1.0]).unwrap();
        let json = serde_json::to_string(&vol).unwrap();
        let back: Volume = serde_json::from_str(&json).unwrap();
        assert_eq!(back.extent(), vol.extent());
        assert_eq!(back.as_slice().unwrap(), vol.as_slice().unwrap());
        assert!(back.is_valid());
    }
}

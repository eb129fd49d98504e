use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Neg, Sub, SubAssign};

/// A 3-dimensional vector type
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct Vector3D([f64; 3]);

impl Vector3D {
    /// Create a new `Vector3D` with components `x`, `y`, `z`
    pub fn new(x: f64, y: f64, z: f64) -> Vector3D {
        Vector3D([x, y, z])
    }

    /// Create a new `Vector3D` with all components set to 0
    pub fn zero() -> Vector3D {
        Vector3D([0.0, 0.0, 0.0])
    }

    /// Return the squared euclidean norm of a `Vector3D`
    #[inline]
    pub fn norm2(&self) -> f64 {
        self * self
    }

    /// Return the euclidean norm of a `Vector3D`
    #[inline]
    pub fn norm(&self) -> f64 {
        f64::sqrt(self.norm2())
    }

    /// Get the components of this vector as an array
    pub fn as_array(&self) -> &[f64; 3] {
        &self.0
    }
}

impl From<[f64; 3]> for Vector3D {
    fn from(array: [f64; 3]) -> Vector3D {
        Vector3D(array)
    }
}

impl Index<usize> for Vector3D {
    type Output = f64;
    #[inline]
    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl IndexMut<usize> for Vector3D {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.0[index]
    }
}

impl Add for Vector3D {
    type Output = Vector3D;
    #[inline]
    fn add(self, other: Vector3D) -> Vector3D {
        Vector3D::new(self[0] + other[0], self[1] + other[1], self[2] + other[2])
    }
}

impl Sub for Vector3D {
    type Output = Vector3D;
    #[inline]
    fn sub(self, other: Vector3D) -> Vector3D {
        Vector3D::new(self[0] - other[0], self[1] - other[1], self[2] - other[2])
    }
}

impl AddAssign for Vector3D {
    #[inline]
    fn add_assign(&mut self, other: Vector3D) {
        *self = *self + other;
    }
}

impl SubAssign for Vector3D {
    #[inline]
    fn sub_assign(&mut self, other: Vector3D) {
        *self = *self - other;
    }
}

impl Neg for Vector3D {
    type Output = Vector3D;
    #[inline]
    fn neg(self) -> Vector3D {
        Vector3D::new(-self[0], -self[1], -self[2])
    }
}

/// Scalar product
impl<'a, 'b> Mul<&'b Vector3D> for &'a Vector3D {
    type Output = f64;
    #[inline]
    fn mul(self, other: &'b Vector3D) -> f64 {
        self[0] * other[0] + self[1] * other[1] + self[2] * other[2]
    }
}

impl Mul<Vector3D> for Vector3D {
    type Output = f64;
    #[inline]
    fn mul(self, other: Vector3D) -> f64 {
        &self * &other
    }
}

impl Mul<f64> for Vector3D {
    type Output = Vector3D;
    #[inline]
    fn mul(self, other: f64) -> Vector3D {
        Vector3D::new(self[0] * other, self[1] * other, self[2] * other)
    }
}

impl Mul<Vector3D> for f64 {
    type Output = Vector3D;
    #[inline]
    fn mul(self, other: Vector3D) -> Vector3D {
        other * self
    }
}

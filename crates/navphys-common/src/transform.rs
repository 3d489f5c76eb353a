//! Placement transform for mesh instances and regions

use glam::{Affine3A, Mat3A, Vec3, Vec3A};

/// Affine transform with its inverse cached.
///
/// Points use the full transform; vectors (velocities, impulses) only use the
/// linear part so they are never offset by the translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    xform: Affine3A,
    inverse: Affine3A,
    identity: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        xform: Affine3A::IDENTITY,
        inverse: Affine3A::IDENTITY,
        identity: true,
    };

    pub fn new(xform: Affine3A) -> Self {
        Self {
            xform,
            inverse: xform.inverse(),
            identity: xform == Affine3A::IDENTITY,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(Affine3A::from_translation(translation))
    }

    #[inline]
    pub fn affine(&self) -> &Affine3A {
        &self.xform
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// `self * inner`: applies `inner` first, then `self`
    pub fn compose(&self, inner: &Transform) -> Transform {
        Self::new(self.xform * inner.xform)
    }

    #[inline]
    pub fn xform_point(&self, p: Vec3) -> Vec3 {
        if self.identity {
            return p;
        }
        self.xform.transform_point3(p)
    }

    #[inline]
    pub fn inverse_xform_point(&self, p: Vec3) -> Vec3 {
        if self.identity {
            return p;
        }
        self.inverse.transform_point3(p)
    }

    #[inline]
    pub fn xform_vector(&self, v: Vec3) -> Vec3 {
        if self.identity {
            return v;
        }
        self.xform.transform_vector3(v)
    }

    #[inline]
    pub fn inverse_xform_vector(&self, v: Vec3) -> Vec3 {
        if self.identity {
            return v;
        }
        self.inverse.transform_vector3(v)
    }

    /// Transforms a surface normal (inverse transpose of the linear part)
    pub fn xform_normal(&self, n: Vec3) -> Vec3 {
        if self.identity {
            return n;
        }
        let inv_t: Mat3A = self.inverse.matrix3.transpose();
        (inv_t * Vec3A::from(n)).normalize_or_zero().into()
    }
}

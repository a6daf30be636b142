use super::Transform;
use glam::{Mat4, Vec2};

impl Transform {
    pub fn from_parts(translation: Vec2, rotation: f32, scale: Vec2) -> Self {
        Self { translation, rotation, scale }
    }

    /// Adds `delta` to the current translation.
    pub fn translate(&mut self, delta: Vec2) {
        self.translation += delta;
    }

    /// Adds `radians` to the current rotation. The angle is not wrapped.
    pub fn rotate(&mut self, radians: f32) {
        self.rotation += radians;
    }

    /// Multiplies the current scale component-wise. Zero and negative factors are kept as given.
    pub fn scale_by(&mut self, factor: Vec2) {
        self.scale *= factor;
    }

    pub fn is_finite(&self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }

    /// Inverse of `to_mat4` for matrices without shear. A negative x scale comes back as a
    /// half-turn of rotation with the y scale negated, which describes the same pose.
    pub fn from_mat4(matrix: Mat4) -> Self {
        let x_axis = matrix.x_axis.truncate().truncate();
        let y_axis = matrix.y_axis.truncate().truncate();
        let rotation = x_axis.y.atan2(x_axis.x);
        let (s, c) = rotation.sin_cos();
        let scale = Vec2::new(x_axis.length(), y_axis.dot(Vec2::new(-s, c)));
        let translation = Vec2::new(matrix.w_axis.x, matrix.w_axis.y);
        Self { translation, rotation, scale }
    }

    /// Local matrix applying scale, then rotation, then translation.
    pub fn to_mat4(&self) -> Mat4 {
        let (sx, sy) = (self.scale.x, self.scale.y);
        let (s, c) = self.rotation.sin_cos();
        Mat4::from_cols_array(&[
            c * sx,
            s * sx,
            0.0,
            0.0,
            -s * sy,
            c * sy,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
            self.translation.x,
            self.translation.y,
            0.0,
            1.0,
        ])
    }
}

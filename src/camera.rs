// =============================================================================
// FLY CAMERA
// =============================================================================
//
// CONTROLS (while the right mouse button is held):
//   mouse      look around
//   W/A/S/D    move forward / left / back / right
//   Q/E        move down / up
//   Shift      move fast
//
// Matrices are right-handed with a 0..1 depth range; the projection flips Y
// because Vulkan clip space points Y down.

use glam::{Mat4, Vec3};
use std::collections::HashSet;
use winit::event::{ElementState, MouseButton};
use winit::keyboard::KeyCode;

const WORLD_UP: Vec3 = Vec3::Y;

pub struct Camera {
    pub position: Vec3,
    /// Degrees; -90 looks down -Z
    pub yaw: f32,
    /// Degrees, clamped to +-89
    pub pitch: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
    pub fast_speed: f32,
    pub sensitivity: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 2.0),
            yaw: -90.0,
            pitch: 0.0,
            fov: 70.0,
            near: 0.1,
            far: 200.0,
            speed: 2.5,
            fast_speed: 10.0,
            sensitivity: 0.1,
        }
    }
}

impl Camera {
    pub fn front(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.front().cross(WORLD_UP).normalize()
    }

    pub fn view(&self) -> Mat4 {
        let front = self.front();
        let up = self.right().cross(front).normalize();
        Mat4::look_at_rh(self.position, self.position + front, up)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut projection = Mat4::perspective_rh(self.fov.to_radians(), aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    /// Mouse offsets in pixels; moving the mouse up looks up.
    pub fn look(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * self.sensitivity;
        self.pitch = (self.pitch - dy * self.sensitivity).clamp(-89.0, 89.0);
    }
}

/// Keyboard/mouse state sampled once per frame.
#[derive(Default)]
pub struct CameraController {
    pressed: HashSet<KeyCode>,
    looking: bool,
    last_cursor: Option<(f64, f64)>,
    pending_look: (f32, f32),
}

impl CameraController {
    pub fn key(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.pressed.insert(key);
            }
            ElementState::Released => {
                self.pressed.remove(&key);
            }
        }
    }

    pub fn mouse_button(&mut self, button: MouseButton, state: ElementState) {
        if button == MouseButton::Right {
            self.looking = state.is_pressed();
            self.last_cursor = None;
        }
    }

    pub fn cursor_moved(&mut self, x: f64, y: f64) {
        if self.looking {
            if let Some((last_x, last_y)) = self.last_cursor {
                self.pending_look.0 += (x - last_x) as f32;
                self.pending_look.1 += (y - last_y) as f32;
            }
            self.last_cursor = Some((x, y));
        }
    }

    pub fn is_looking(&self) -> bool {
        self.looking
    }

    /// Apply everything gathered since the last call.
    pub fn update(&mut self, camera: &mut Camera, dt: f32) {
        let (dx, dy) = std::mem::take(&mut self.pending_look);
        if !self.looking {
            return;
        }
        camera.look(dx, dy);

        let fast = self.pressed.contains(&KeyCode::ShiftLeft) || self.pressed.contains(&KeyCode::ShiftRight);
        let velocity = if fast { camera.fast_speed } else { camera.speed } * dt;
        let (front, right) = (camera.front(), camera.right());

        let mut direction = Vec3::ZERO;
        for key in &self.pressed {
            direction += match key {
                KeyCode::KeyW => front,
                KeyCode::KeyS => -front,
                KeyCode::KeyA => -right,
                KeyCode::KeyD => right,
                KeyCode::KeyE => WORLD_UP,
                KeyCode::KeyQ => -WORLD_UP,
                _ => Vec3::ZERO,
            };
        }
        camera.position += direction * velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::default();

        assert!((camera.front() - Vec3::NEG_Z).length() < 1e-5);
        let origin_in_view = camera.view().transform_point3(Vec3::ZERO);
        assert!((origin_in_view - Vec3::new(0.0, 0.0, -2.0)).length() < 1e-5);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let camera = Camera::default();

        let clip = camera.projection(1.0) * Vec4::new(0.0, 1.0, -1.0, 1.0);

        assert!(clip.y / clip.w < 0.0);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();

        camera.look(0.0, -10_000.0);

        assert_eq!(camera.pitch, 89.0);
    }

    #[test]
    fn movement_only_while_looking() {
        let mut camera = Camera::default();
        let mut controller = CameraController::default();
        controller.key(KeyCode::KeyW, ElementState::Pressed);

        controller.update(&mut camera, 1.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, 2.0));

        controller.mouse_button(MouseButton::Right, ElementState::Pressed);
        controller.update(&mut camera, 1.0);
        assert!((camera.position - Vec3::new(0.0, 0.0, -0.5)).length() < 1e-4);
    }
}

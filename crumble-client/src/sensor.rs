//! Point-set sensors for terrain contact.

use std::f32::consts::{FRAC_PI_2, TAU};

use crate::collision::{Body, is_solid};
use crate::grid::ChunkGrid;

/// Points in unit body space, `+y` pointing along the body's heading.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub shape: Vec<[f32; 2]>,
}

impl Default for Sensor {
    fn default() -> Self {
        Self::circle()
    }
}

impl Sensor {
    pub fn new(shape: Vec<[f32; 2]>) -> Self {
        Self { shape }
    }

    /// Eight points on the unit circle, the first straight ahead.
    pub fn circle() -> Self {
        let shape = (0..8)
            .map(|i| {
                let a = TAU * i as f32 / 8.0 + FRAC_PI_2;
                let snap = |v: f32| if v.abs() < 1e-6 { 0.0 } else { v };
                [snap(a.cos()), snap(a.sin())]
            })
            .collect();
        Self { shape }
    }

    pub fn player() -> Self {
        Self::new(vec![[0.0, 1.0], [0.5, 0.5], [0.5, -0.5], [0.0, -1.0], [-0.5, -0.5], [-0.5, 0.5]])
    }

    pub fn bullet() -> Self {
        Self::new(vec![[0.0, 1.0], [0.0, -1.0], [-0.5, 0.5], [0.5, 0.5], [-0.5, -0.5], [0.5, -0.5]])
    }

    /// World positions of the sensor points for `body`.
    pub fn points(&self, body: &Body) -> Vec<(f32, f32)> {
        // unit +y maps onto the heading
        let (sin, cos) = (body.rotation - FRAC_PI_2).sin_cos();
        self.shape
            .iter()
            .map(|&[px, py]| {
                let x = (px * cos - py * sin) * body.width + body.x;
                let y = (px * sin + py * cos) * body.height + body.y;
                (x, y)
            })
            .collect()
    }

    /// Number of sensor points on solid terrain.
    pub fn contacts(&self, grid: &ChunkGrid, body: &Body) -> usize {
        self.points(body)
            .into_iter()
            .filter(|&(x, y)| is_solid(grid, x, y))
            .count()
    }

    pub fn touches(&self, grid: &ChunkGrid, body: &Body) -> bool {
        self.contacts(grid, body) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-4 && (a.1 - b.1).abs() < 1e-4
    }

    #[test]
    fn test_circle_shape() {
        let sensor = Sensor::circle();
        assert_eq!(sensor.shape.len(), 8);
        assert_eq!(sensor.shape[0], [0.0, 1.0]);
        assert_eq!(sensor.shape[2], [-1.0, 0.0]);
    }

    #[test]
    fn test_nose_follows_heading() {
        let sensor = Sensor::player();
        let mut body = Body::new(10.0, 20.0, 2.0);

        body.rotation = 0.0;
        assert!(close(sensor.points(&body)[0], (12.0, 20.0)));

        body.rotation = std::f32::consts::FRAC_PI_2;
        assert!(close(sensor.points(&body)[0], (10.0, 22.0)));
    }

    #[test]
    fn test_extents_scale_axes() {
        let sensor = Sensor::new(vec![[1.0, 0.0], [0.0, 1.0]]);
        let body = Body {
            x: 0.0,
            y: 0.0,
            width: 3.0,
            height: 5.0,
            rotation: FRAC_PI_2,
        };
        let points = sensor.points(&body);
        assert!(close(points[0], (3.0, 0.0)));
        assert!(close(points[1], (0.0, 5.0)));
    }
}

//! Progressive probabilistic Hough transform over a binary image.
//!
//! Foreground pixels are visited in a seeded random order. Each one votes in a
//! (theta, rho) accumulator; once a bin passes the vote threshold the line is
//! walked in both directions from the pixel, bridging gaps up to
//! `max_line_gap`. The walked pixels are removed from further voting, and if
//! the segment is long enough its votes are withdrawn and it is emitted.

use std::f32::consts::PI;

use image::GrayImage;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq)]
pub struct HoughParams {
    /// Distance resolution in pixels.
    pub rho: f32,
    /// Angle resolution in degrees.
    pub theta_degrees: f32,
    pub threshold: u32,
    pub min_line_length: u32,
    pub max_line_gap: u32,
    pub seed: u64,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            rho: 1.0,
            theta_degrees: 1.0,
            threshold: 30,
            min_line_length: 50,
            max_line_gap: 10,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegment {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl LineSegment {
    pub fn length(&self) -> f32 {
        let dx = (self.x2 - self.x1) as f32;
        let dy = (self.y2 - self.y1) as f32;
        dx.hypot(dy)
    }

    /// Direction of the segment in degrees, `atan2(dy, dx)`.
    pub fn angle_degrees(&self) -> f32 {
        let dx = (self.x2 - self.x1) as f32;
        let dy = (self.y2 - self.y1) as f32;
        dy.atan2(dx).to_degrees()
    }
}

struct Accumulator {
    votes: Vec<i32>,
    trig: Vec<(f32, f32)>,
    num_rho: usize,
    rho_offset: i32,
}

impl Accumulator {
    fn new(width: u32, height: u32, params: &HoughParams) -> Self {
        let theta = params.theta_degrees.to_radians();
        let irho = 1.0 / params.rho;
        let num_angle = ((PI / theta).round() as usize).max(1);
        let num_rho = ((((width + height) * 2 + 1) as f32 * irho).round() as usize).max(1);
        let trig = (0..num_angle)
            .map(|n| {
                let angle = n as f32 * theta;
                (angle.cos() * irho, angle.sin() * irho)
            })
            .collect();
        Self {
            votes: vec![0; num_angle * num_rho],
            trig,
            num_rho,
            rho_offset: (num_rho as i32 - 1) / 2,
        }
    }

    fn bin(&self, x: i32, y: i32, n: usize) -> Option<usize> {
        let (cos, sin) = self.trig[n];
        let r = (x as f32 * cos + y as f32 * sin).round() as i32 + self.rho_offset;
        (r >= 0 && (r as usize) < self.num_rho).then(|| n * self.num_rho + r as usize)
    }

    /// Adds the pixel's votes and returns the angle index of the strongest bin
    /// above `threshold`, if any.
    fn vote(&mut self, x: i32, y: i32, threshold: i32) -> Option<usize> {
        let mut best = threshold - 1;
        let mut best_angle = None;
        for n in 0..self.trig.len() {
            if let Some(bin) = self.bin(x, y, n) {
                self.votes[bin] += 1;
                if self.votes[bin] > best {
                    best = self.votes[bin];
                    best_angle = Some(n);
                }
            }
        }
        best_angle
    }

    fn withdraw(&mut self, x: i32, y: i32) {
        for n in 0..self.trig.len() {
            if let Some(bin) = self.bin(x, y, n) {
                self.votes[bin] -= 1;
            }
        }
    }
}

struct Walker {
    x: f32,
    y: f32,
    dx: f32,
    dy: f32,
}

impl Walker {
    /// Steps one pixel along the major axis of the direction perpendicular to
    /// the normal angle `theta`.
    fn new(x: i32, y: i32, theta: f32, forward: bool) -> Self {
        let (nx, ny) = (-theta.sin(), theta.cos());
        let (mut dx, mut dy) = if nx.abs() > ny.abs() {
            (nx.signum(), ny / nx.abs())
        } else {
            (nx / ny.abs(), ny.signum())
        };
        if !forward {
            dx = -dx;
            dy = -dy;
        }
        Self {
            x: x as f32,
            y: y as f32,
            dx,
            dy,
        }
    }

    fn position(&self) -> (i32, i32) {
        (self.x.round() as i32, self.y.round() as i32)
    }

    fn step(&mut self) -> (i32, i32) {
        self.x += self.dx;
        self.y += self.dy;
        self.position()
    }
}

#[instrument(level = "debug", skip(image))]
pub fn probabilistic_hough(image: &GrayImage, params: &HoughParams) -> Vec<LineSegment> {
    let (width, height) = (image.width() as i32, image.height() as i32);
    if width == 0 || height == 0 || params.rho <= 0.0 || params.theta_degrees <= 0.0 {
        return Vec::new();
    }
    let theta = params.theta_degrees.to_radians();
    let index = |x: i32, y: i32| (y * width + x) as usize;
    let inside = |x: i32, y: i32| x >= 0 && y >= 0 && x < width && y < height;

    let mut accumulator = Accumulator::new(image.width(), image.height(), params);
    let mut mask = vec![false; (width * height) as usize];
    let mut points = Vec::new();
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[0] > 0 {
            mask[index(x as i32, y as i32)] = true;
            points.push((x as i32, y as i32));
        }
    }
    let mut rng = StdRng::seed_from_u64(params.seed);
    points.shuffle(&mut rng);

    let threshold = params.threshold.max(1) as i32;
    let max_gap = params.max_line_gap as i32;
    let min_length = params.min_line_length as i32;
    let mut segments = Vec::new();

    for (x0, y0) in points {
        if !mask[index(x0, y0)] {
            continue;
        }
        let Some(n) = accumulator.vote(x0, y0, threshold) else {
            continue;
        };
        let angle = n as f32 * theta;

        let mut ends = [(x0, y0); 2];
        for (k, end) in ends.iter_mut().enumerate() {
            let mut walker = Walker::new(x0, y0, angle, k == 0);
            let mut gap = 0;
            loop {
                let (x, y) = walker.step();
                if !inside(x, y) {
                    break;
                }
                if mask[index(x, y)] {
                    gap = 0;
                    *end = (x, y);
                } else {
                    gap += 1;
                    if gap > max_gap {
                        break;
                    }
                }
            }
        }

        let good_line = (ends[1].0 - ends[0].0).abs() >= min_length
            || (ends[1].1 - ends[0].1).abs() >= min_length;

        for (k, end) in ends.iter().enumerate() {
            let mut walker = Walker::new(x0, y0, angle, k == 0);
            let (mut x, mut y) = walker.position();
            while inside(x, y) {
                if mask[index(x, y)] {
                    if good_line {
                        accumulator.withdraw(x, y);
                    }
                    mask[index(x, y)] = false;
                }
                if (x, y) == *end {
                    break;
                }
                (x, y) = walker.step();
            }
        }

        if good_line {
            segments.push(LineSegment {
                x1: ends[0].0,
                y1: ends[0].1,
                x2: ends[1].0,
                y2: ends[1].1,
            });
        }
    }

    log::trace!("Hough transform found {} segments", segments.len());
    segments
}

//! Pure rally simulation: paddles, ball, walls, scoring edge.
//!
//! All positions are centers in field coordinates, velocities are in
//! pixels per tick. Nothing here does I/O or randomization; serves are
//! handed in by the match so replays stay deterministic.

use crate::ws::protocol::Side;

/// Field width
pub const FIELD_W: f32 = 800.0;
/// Field height
pub const FIELD_H: f32 = 500.0;
/// Paddle dimensions
pub const PADDLE_W: f32 = 12.0;
pub const PADDLE_H: f32 = 80.0;
/// Horizontal inset of each paddle's outer edge from the field edge
pub const PADDLE_INSET: f32 = 24.0;
/// Ball diameter
pub const BALL_SIZE: f32 = 12.0;
/// Maximum paddle travel per tick
pub const PADDLE_SPEED: f32 = 9.0;
/// Horizontal serve speed
pub const SERVE_SPEED: f32 = 6.0;
/// Horizontal speed gained per paddle hit
pub const SPEED_INCREMENT: f32 = 0.6;
/// Horizontal speed cap
pub const MAX_BALL_SPEED: f32 = 14.0;
/// Vertical velocity added per unit of offset from the paddle center
pub const SPIN_FACTOR: f32 = 0.25;
/// Largest |vertical velocity| a serve may carry
pub const SERVE_MAX_VY: f32 = 3.0;

/// Valid range for a paddle center Y
pub fn paddle_y_range() -> (f32, f32) {
    (PADDLE_H / 2.0, FIELD_H - PADDLE_H / 2.0)
}

/// Clamp a commanded paddle target into the valid range
pub fn clamp_paddle_target(target_y: f32) -> f32 {
    let (lo, hi) = paddle_y_range();
    if target_y.is_finite() {
        target_y.clamp(lo, hi)
    } else {
        FIELD_H / 2.0
    }
}

/// Live physics state of one rally
#[derive(Debug, Clone)]
pub struct RallyState {
    pub ball_x: f32,
    pub ball_y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    /// Paddle center Y, index 0 = left, 1 = right
    pub paddles: [f32; 2],
    /// Latest commanded paddle target per side
    pub targets: [f32; 2],
}

impl RallyState {
    /// Centered state with the ball at rest; call [`RallyState::serve`]
    /// before the first tick.
    pub fn new() -> Self {
        let mid_y = FIELD_H / 2.0;
        Self {
            ball_x: FIELD_W / 2.0,
            ball_y: mid_y,
            vel_x: 0.0,
            vel_y: 0.0,
            paddles: [mid_y, mid_y],
            targets: [mid_y, mid_y],
        }
    }

    /// Re-center the ball and launch it toward `toward` with the given
    /// vertical component. Paddles keep their positions between rallies.
    pub fn serve(&mut self, toward: Side, vel_y: f32) {
        self.ball_x = FIELD_W / 2.0;
        self.ball_y = FIELD_H / 2.0;
        self.vel_x = match toward {
            Side::Left => -SERVE_SPEED,
            Side::Right => SERVE_SPEED,
        };
        self.vel_y = vel_y.clamp(-SERVE_MAX_VY, SERVE_MAX_VY);
    }

    /// Advance one tick. Returns the side that scored if the ball left
    /// the field this tick.
    pub fn step(&mut self) -> Option<Side> {
        self.move_paddles();
        let prev_x = self.ball_x;
        self.integrate_ball();
        self.bounce_walls();
        self.collide_paddles(prev_x);
        self.scoring_edge()
    }

    fn move_paddles(&mut self) {
        let (lo, hi) = paddle_y_range();
        for i in 0..2 {
            let delta = self.targets[i] - self.paddles[i];
            let step = delta.clamp(-PADDLE_SPEED, PADDLE_SPEED);
            self.paddles[i] = (self.paddles[i] + step).clamp(lo, hi);
        }
    }

    fn integrate_ball(&mut self) {
        self.ball_x += self.vel_x;
        self.ball_y += self.vel_y;
    }

    fn bounce_walls(&mut self) {
        let half = BALL_SIZE / 2.0;
        if self.ball_y - half < 0.0 {
            self.ball_y = half;
            self.vel_y = self.vel_y.abs();
        } else if self.ball_y + half > FIELD_H {
            self.ball_y = FIELD_H - half;
            self.vel_y = -self.vel_y.abs();
        }
    }

    fn collide_paddles(&mut self, prev_x: f32) {
        let half = BALL_SIZE / 2.0;
        let left_front = PADDLE_INSET + PADDLE_W;
        let right_front = FIELD_W - PADDLE_INSET - PADDLE_W;

        // Crossing test against the pre-integration position so a fast
        // ball cannot tunnel through the paddle plane in one tick.
        if self.vel_x < 0.0
            && prev_x - half > left_front
            && self.ball_x - half <= left_front
            && self.within_paddle(Side::Left)
        {
            let speed = (self.vel_x.abs() + SPEED_INCREMENT).min(MAX_BALL_SPEED);
            self.vel_x = speed;
            self.vel_y += SPIN_FACTOR * (self.ball_y - self.paddles[0]);
            // Snap to the front edge so the hit cannot re-trigger next tick
            self.ball_x = left_front + half;
        } else if self.vel_x > 0.0
            && prev_x + half < right_front
            && self.ball_x + half >= right_front
            && self.within_paddle(Side::Right)
        {
            let speed = (self.vel_x.abs() + SPEED_INCREMENT).min(MAX_BALL_SPEED);
            self.vel_x = -speed;
            self.vel_y += SPIN_FACTOR * (self.ball_y - self.paddles[1]);
            self.ball_x = right_front - half;
        }
    }

    fn within_paddle(&self, side: Side) -> bool {
        let paddle_y = self.paddles[side.index()];
        let extent = PADDLE_H / 2.0 + BALL_SIZE / 2.0;
        (self.ball_y - paddle_y).abs() <= extent
    }

    /// Side that scored this tick, if the ball fully left the field.
    fn scoring_edge(&self) -> Option<Side> {
        let half = BALL_SIZE / 2.0;
        if self.ball_x + half < 0.0 {
            Some(Side::Right)
        } else if self.ball_x - half > FIELD_W {
            Some(Side::Left)
        } else {
            None
        }
    }
}

impl Default for RallyState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paddle_moves_toward_target_without_overshoot() {
        let mut rally = RallyState::new();
        rally.targets[0] = rally.paddles[0] + 4.0;
        rally.step();
        assert!((rally.paddles[0] - rally.targets[0]).abs() < f32::EPSILON);

        rally.targets[0] = rally.paddles[0] + 100.0;
        let before = rally.paddles[0];
        rally.step();
        assert!((rally.paddles[0] - (before + PADDLE_SPEED)).abs() < f32::EPSILON);
    }

    #[test]
    fn paddle_clamped_inside_field() {
        let mut rally = RallyState::new();
        rally.targets[1] = 10_000.0;
        // targets come pre-clamped in the match, but the paddle clamp
        // must hold even for raw values
        for _ in 0..200 {
            rally.step();
        }
        let (_, hi) = paddle_y_range();
        assert!(rally.paddles[1] <= hi);
    }

    #[test]
    fn wall_bounce_keeps_ball_inside_bounds() {
        let mut rally = RallyState::new();
        rally.serve(Side::Right, SERVE_MAX_VY);
        let half = BALL_SIZE / 2.0;
        for _ in 0..300 {
            rally.step();
            assert!(rally.ball_y >= half && rally.ball_y <= FIELD_H - half);
            if rally.ball_x > FIELD_W {
                break;
            }
        }
    }

    #[test]
    fn wall_bounce_inverts_vertical_velocity() {
        let mut rally = RallyState::new();
        rally.ball_y = BALL_SIZE / 2.0 + 1.0;
        rally.vel_y = -5.0;
        rally.vel_x = 0.0;
        rally.step();
        assert!(rally.vel_y > 0.0);
    }

    #[test]
    fn paddle_hit_caps_speed_and_reverses_direction() {
        let mut rally = RallyState::new();
        let half = BALL_SIZE / 2.0;
        rally.ball_x = PADDLE_INSET + PADDLE_W + half + 1.0;
        rally.ball_y = rally.paddles[0];
        rally.vel_x = -MAX_BALL_SPEED;
        rally.vel_y = 0.0;
        rally.step();
        assert!(rally.vel_x > 0.0, "direction must point away from left paddle");
        assert!(rally.vel_x <= MAX_BALL_SPEED + f32::EPSILON);
    }

    #[test]
    fn paddle_hit_adds_increment_below_cap() {
        let mut rally = RallyState::new();
        let half = BALL_SIZE / 2.0;
        rally.ball_x = FIELD_W - PADDLE_INSET - PADDLE_W - half - 1.0;
        rally.ball_y = rally.paddles[1];
        rally.vel_x = SERVE_SPEED;
        rally.vel_y = 0.0;
        rally.step();
        assert!((rally.vel_x - (-(SERVE_SPEED + SPEED_INCREMENT))).abs() < 1e-4);
    }

    #[test]
    fn paddle_hit_applies_spin_from_offset() {
        let mut rally = RallyState::new();
        let half = BALL_SIZE / 2.0;
        rally.ball_x = PADDLE_INSET + PADDLE_W + half + 1.0;
        rally.ball_y = rally.paddles[0] + 20.0;
        rally.vel_x = -SERVE_SPEED;
        rally.vel_y = 0.0;
        rally.step();
        assert!(rally.vel_y > 0.0, "hit below center must deflect downward-field");
    }

    #[test]
    fn ball_past_misaligned_paddle_scores_for_opponent() {
        let mut rally = RallyState::new();
        rally.serve(Side::Left, 0.0);
        // Park the left paddle far from the ball path
        let (lo, _) = paddle_y_range();
        rally.paddles[0] = lo;
        rally.targets[0] = lo;
        let mut scored = None;
        for _ in 0..300 {
            if let Some(side) = rally.step() {
                scored = Some(side);
                break;
            }
        }
        assert_eq!(scored, Some(Side::Right));
    }

    #[test]
    fn serve_targets_the_conceding_side() {
        let mut rally = RallyState::new();
        rally.serve(Side::Left, 1.0);
        assert!(rally.vel_x < 0.0);
        rally.serve(Side::Right, -1.0);
        assert!(rally.vel_x > 0.0);
        assert!((rally.ball_x - FIELD_W / 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn clamp_paddle_target_handles_garbage() {
        let (lo, hi) = paddle_y_range();
        assert_eq!(clamp_paddle_target(-500.0), lo);
        assert_eq!(clamp_paddle_target(10_000.0), hi);
        assert_eq!(clamp_paddle_target(f32::NAN), FIELD_H / 2.0);
    }
}

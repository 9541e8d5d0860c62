//! Minimal paddle-ball engine behind the [`GameEngine`] port.
//!
//! Coordinates are normalized to a unit field: x grows toward player two's
//! goal, y grows downward. The simulation is deliberately simple; the port
//! is the contract, and richer physics can replace this adapter without
//! touching the orchestrator.

use rand::Rng;

use rallyd_domain::PlayerRole;
use rallyd_shared::{GameFrame, PaddleMove};

use crate::ports::{EngineFactory, GameEngine};

const PADDLE_HEIGHT: f64 = 0.2;
const PADDLE_SPEED: f64 = 1.2;
const BALL_SPEED: f64 = 0.9;

struct Paddle {
    y: f64,
    direction: f64,
}

impl Paddle {
    fn new() -> Self {
        Self {
            y: 0.5,
            direction: 0.0,
        }
    }

    fn advance(&mut self, dt: f64) {
        let half = PADDLE_HEIGHT / 2.0;
        self.y = (self.y + self.direction * PADDLE_SPEED * dt).clamp(half, 1.0 - half);
    }

    fn covers(&self, y: f64) -> bool {
        (y - self.y).abs() <= PADDLE_HEIGHT / 2.0
    }
}

pub struct PongEngine {
    ball_x: f64,
    ball_y: f64,
    vel_x: f64,
    vel_y: f64,
    paddle1: Paddle,
    paddle2: Paddle,
    score1: u32,
    score2: u32,
}

impl PongEngine {
    pub fn new() -> Self {
        let mut engine = Self {
            ball_x: 0.5,
            ball_y: 0.5,
            vel_x: 0.0,
            vel_y: 0.0,
            paddle1: Paddle::new(),
            paddle2: Paddle::new(),
            score1: 0,
            score2: 0,
        };
        engine.serve(PlayerRole::Player1);
        engine
    }

    /// Reset the ball to center, served toward the given side's goal line.
    fn serve(&mut self, toward: PlayerRole) {
        let mut rng = rand::thread_rng();
        self.ball_x = 0.5;
        self.ball_y = 0.5;
        let angle: f64 = rng.gen_range(-0.6..0.6);
        let direction = match toward {
            PlayerRole::Player1 => -1.0,
            PlayerRole::Player2 => 1.0,
        };
        self.vel_x = direction * BALL_SPEED * angle.cos();
        self.vel_y = BALL_SPEED * angle.sin();
    }

    fn frame(&self) -> GameFrame {
        GameFrame {
            ball_x: self.ball_x,
            ball_y: self.ball_y,
            paddle1_y: self.paddle1.y,
            paddle2_y: self.paddle2.y,
            score1: self.score1,
            score2: self.score2,
        }
    }
}

impl Default for PongEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl GameEngine for PongEngine {
    fn advance(&mut self, dt: f64) -> GameFrame {
        self.paddle1.advance(dt);
        self.paddle2.advance(dt);

        self.ball_x += self.vel_x * dt;
        self.ball_y += self.vel_y * dt;

        // Walls
        if self.ball_y <= 0.0 {
            self.ball_y = -self.ball_y;
            self.vel_y = self.vel_y.abs();
        } else if self.ball_y >= 1.0 {
            self.ball_y = 2.0 - self.ball_y;
            self.vel_y = -self.vel_y.abs();
        }

        // Paddle planes sit at the goal lines
        if self.ball_x <= 0.0 {
            if self.paddle1.covers(self.ball_y) {
                self.ball_x = -self.ball_x;
                self.vel_x = self.vel_x.abs();
            } else {
                self.score2 += 1;
                self.serve(PlayerRole::Player2);
            }
        } else if self.ball_x >= 1.0 {
            if self.paddle2.covers(self.ball_y) {
                self.ball_x = 2.0 - self.ball_x;
                self.vel_x = -self.vel_x.abs();
            } else {
                self.score1 += 1;
                self.serve(PlayerRole::Player1);
            }
        }

        self.frame()
    }

    fn apply_input(&mut self, side: PlayerRole, mv: PaddleMove) {
        let paddle = match side {
            PlayerRole::Player1 => &mut self.paddle1,
            PlayerRole::Player2 => &mut self.paddle2,
        };
        paddle.direction = match mv {
            PaddleMove::Up => -1.0,
            PaddleMove::Down => 1.0,
            PaddleMove::Stop => 0.0,
        };
    }

    fn score_of(&self, side: PlayerRole) -> u32 {
        match side {
            PlayerRole::Player1 => self.score1,
            PlayerRole::Player2 => self.score2,
        }
    }
}

/// Factory wired into the session adapter at startup.
pub struct PongEngineFactory;

impl EngineFactory for PongEngineFactory {
    fn create(&self) -> Box<dyn GameEngine> {
        Box::new(PongEngine::new())
    }
}

#![allow(dead_code)]

use log::LevelFilter;
use once_cell::sync::Lazy;
use opframe::{Color, Texture};
use simple_logger::SimpleLogger;

static LOGGER: Lazy<()> = Lazy::new(|| {
    SimpleLogger::new()
        .with_level(LevelFilter::Debug)
        .init()
        .expect("logger already set");
});

pub fn init_logging() {
    Lazy::force(&LOGGER);
}

pub const RED: Color = Color::rgb(255, 0, 0);
pub const GREEN: Color = Color::rgb(0, 255, 0);
pub const BLUE: Color = Color::rgb(0, 0, 255);
pub const WHITE: Color = Color::WHITE;

/// A 2x2 texture with four distinct pixels.
pub fn checkerboard() -> Texture {
    Texture::new(2, 2, vec![RED, GREEN, BLUE, WHITE])
}

/// The checkerboard scaled to 4x4 with nearest filtering.
pub fn checkerboard_4x4() -> Vec<Color> {
    let mut pixels = Vec::with_capacity(16);
    for y in 0..4 {
        for x in 0..4 {
            pixels.push(match (x / 2, y / 2) {
                (0, 0) => RED,
                (1, 0) => GREEN,
                (0, _) => BLUE,
                _ => WHITE,
            });
        }
    }
    pixels
}

//! Synthetic detection sequences shared by tests
use crate::utils::Rect;

/// Box of a single vehicle driving right and slightly down, 5 px per frame
pub fn moving_box(frame: u64) -> Rect {
    Rect::new(20.0 + 5.0 * frame as f32, 100.0 + 2.0 * frame as f32, 80.0, 40.0)
}

/// Box whose center sits exactly on `(cx, cy)`
pub fn box_around(cx: f32, cy: f32) -> Rect {
    Rect::new(cx - 20.0, cy - 10.0, 40.0, 20.0)
}

/// Four well separated objects moving in different directions over 30 frames
pub fn get_spread_data() -> Vec<Vec<Rect>> {
    (0..30)
        .map(|i| {
            let t = i as f32;
            vec![
                Rect::new(50.0 + 4.0 * t, 50.0, 60.0, 40.0),
                Rect::new(900.0 - 4.0 * t, 60.0, 60.0, 40.0),
                Rect::new(300.0, 300.0 + 3.0 * t, 50.0, 50.0),
                Rect::new(700.0 + 2.0 * t, 600.0 - 2.0 * t, 70.0, 50.0),
            ]
        })
        .collect()
}

/// Two vehicles in adjacent lanes passing each other in opposite directions
pub fn passing_pair() -> (Vec<Rect>, Vec<Rect>) {
    let left = (0..40)
        .map(|i| Rect::new(100.0 + 10.0 * i as f32, 200.0, 60.0, 40.0))
        .collect();
    let right = (0..40)
        .map(|i| Rect::new(500.0 - 10.0 * i as f32, 260.0, 60.0, 40.0))
        .collect();
    (left, right)
}

//! Coordinate math: pointy-top axial hexes and square-grid cells in a shared
//! 2D world plane.

use contracts::HexCoord;

pub const AXIAL_DIRECTIONS: [HexCoord; 6] = [
    HexCoord::new(1, 0),
    HexCoord::new(1, -1),
    HexCoord::new(0, -1),
    HexCoord::new(-1, 0),
    HexCoord::new(-1, 1),
    HexCoord::new(0, 1),
];

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Pointy-top axial to 2D world coordinates (unit-size hexes).
pub fn axial_to_world_xy(coord: HexCoord) -> (f64, f64) {
    let x = SQRT_3 * (coord.q as f64 + coord.r as f64 / 2.0);
    let y = 1.5 * coord.r as f64;
    (x, y)
}

/// Inverse of [`axial_to_world_xy`] with cube rounding to the containing hex.
pub fn world_xy_to_axial(x: f64, y: f64) -> HexCoord {
    let fr = y / 1.5;
    let fq = x / SQRT_3 - fr / 2.0;
    cube_round(fq, fr)
}

fn cube_round(fq: f64, fr: f64) -> HexCoord {
    let fs = -fq - fr;
    let mut q = fq.round();
    let mut r = fr.round();
    let s = fs.round();

    let dq = (q - fq).abs();
    let dr = (r - fr).abs();
    let ds = (s - fs).abs();

    if dq > dr && dq > ds {
        q = -r - s;
    } else if dr > ds {
        r = -q - s;
    }
    HexCoord::new(q as i64, r as i64)
}

/// Center of a square-grid cell in world coordinates.
pub fn square_grid_cell_to_world_xy(cell_x: i64, cell_y: i64) -> (f64, f64) {
    (cell_x as f64 + 0.5, cell_y as f64 + 0.5)
}

/// The square-grid cell containing a world position.
pub fn world_xy_to_square_grid_cell(x: f64, y: f64) -> (i64, i64) {
    (x.floor() as i64, y.floor() as i64)
}

/// Unit vector in the direction of `(x, y)`, or zero for the zero vector.
pub fn normalized_vector(x: f64, y: f64) -> (f64, f64) {
    let magnitude_sq = x * x + y * y;
    if magnitude_sq == 0.0 {
        return (0.0, 0.0);
    }
    let magnitude = magnitude_sq.sqrt();
    (x / magnitude, y / magnitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axial_world_round_trip_on_hex_centers() {
        for q in -6..=6 {
            for r in -6..=6 {
                let coord = HexCoord::new(q, r);
                let (x, y) = axial_to_world_xy(coord);
                assert_eq!(world_xy_to_axial(x, y), coord, "coord {coord}");
            }
        }
    }

    #[test]
    fn nearby_positions_round_to_containing_hex() {
        let (x, y) = axial_to_world_xy(HexCoord::new(2, -1));
        assert_eq!(world_xy_to_axial(x + 0.3, y - 0.2), HexCoord::new(2, -1));
    }

    #[test]
    fn square_grid_cell_round_trip() {
        for cx in -4..=4 {
            for cy in -4..=4 {
                let (x, y) = square_grid_cell_to_world_xy(cx, cy);
                assert_eq!(world_xy_to_square_grid_cell(x, y), (cx, cy));
            }
        }
        assert_eq!(world_xy_to_square_grid_cell(-0.25, 0.25), (-1, 0));
    }

    #[test]
    fn normalized_vector_handles_zero() {
        assert_eq!(normalized_vector(0.0, 0.0), (0.0, 0.0));
        let (x, y) = normalized_vector(3.0, 4.0);
        assert!((x - 0.6).abs() < 1e-12);
        assert!((y - 0.8).abs() < 1e-12);
    }

    #[test]
    fn directions_are_distance_one() {
        let origin = HexCoord::new(0, 0);
        for delta in AXIAL_DIRECTIONS {
            assert_eq!(origin.axial_distance(&delta), 1);
        }
    }
}

//! The dihedral group D8 extended with mirrors (16 elements)
//!
//! Elements describe how a texture frame is rotated or mirrored inside an atlas.
//! Each element `r` maps the x axis to `(ux(r), uy(r))` and the y axis to
//! `(vx(r), vy(r))`. Even elements are quarter turns or diagonal mirrors and
//! keep frames rectangular; odd elements are 45 degree turns.

use std::sync::OnceLock;

/// Identity
pub const E: u8 = 0;
/// 45° clockwise
pub const SE: u8 = 1;
/// 90° clockwise
pub const S: u8 = 2;
pub const SW: u8 = 3;
/// 180°
pub const W: u8 = 4;
pub const NW: u8 = 5;
/// 90° counter-clockwise
pub const N: u8 = 6;
pub const NE: u8 = 7;
/// Reflection about the horizontal axis
pub const MIRROR_VERTICAL: u8 = 8;
pub const MAIN_DIAGONAL: u8 = 10;
/// Reflection about the vertical axis
pub const MIRROR_HORIZONTAL: u8 = 12;
pub const REVERSE_DIAGONAL: u8 = 14;

/// Number of elements
pub const ORDER: u8 = 16;

const UX: [i8; 16] = [1, 1, 0, -1, -1, -1, 0, 1, 1, 1, 0, -1, -1, -1, 0, 1];
const UY: [i8; 16] = [0, 1, 1, 1, 0, -1, -1, -1, 0, 1, 1, 1, 0, -1, -1, -1];
const VX: [i8; 16] = [0, -1, -1, -1, 0, 1, 1, 1, 0, 1, 1, 1, 0, -1, -1, -1];
const VY: [i8; 16] = [1, 1, 0, -1, -1, -1, 0, 1, -1, -1, 0, 1, 1, 1, 0, -1];

fn cayley() -> &'static [[u8; 16]; 16] {
    static TABLE: OnceLock<[[u8; 16]; 16]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [[0u8; 16]; 16];
        for i in 0..16 {
            for j in 0..16 {
                let ux = (UX[i] * UX[j] + VX[i] * UY[j]).signum();
                let uy = (UY[i] * UX[j] + VY[i] * UY[j]).signum();
                let vx = (UX[i] * VX[j] + VX[i] * VY[j]).signum();
                let vy = (UY[i] * VX[j] + VY[i] * VY[j]).signum();

                if let Some(k) =
                    (0..16).find(|&k| UX[k] == ux && UY[k] == uy && VX[k] == vx && VY[k] == vy)
                {
                    table[i][j] = k as u8;
                }
            }
        }
        table
    })
}

#[inline]
pub fn ux(r: u8) -> i8 {
    UX[(r & 15) as usize]
}

#[inline]
pub fn uy(r: u8) -> i8 {
    UY[(r & 15) as usize]
}

#[inline]
pub fn vx(r: u8) -> i8 {
    VX[(r & 15) as usize]
}

#[inline]
pub fn vy(r: u8) -> i8 {
    VY[(r & 15) as usize]
}

/// Inverse element
pub fn inv(r: u8) -> u8 {
    if r & 8 != 0 {
        r & 15
    } else {
        r.wrapping_neg() & 7
    }
}

/// Composition: apply `r1` then `r2`
pub fn add(r1: u8, r2: u8) -> u8 {
    cayley()[(r1 & 15) as usize][(r2 & 15) as usize]
}

pub fn sub(r1: u8, r2: u8) -> u8 {
    add(r1, inv(r2))
}

pub fn rotate180(r: u8) -> u8 {
    r ^ 4
}

/// Whether the element swaps width and height
pub fn is_vertical(r: u8) -> bool {
    (r & 3) == 2
}

pub fn is_valid(r: u8) -> bool {
    r < ORDER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_neutral() {
        for r in 0..ORDER {
            assert_eq!(add(E, r), r);
            assert_eq!(add(r, E), r);
        }
    }

    #[test]
    fn every_element_has_inverse() {
        for r in 0..ORDER {
            assert_eq!(add(r, inv(r)), E, "element {r}");
        }
    }

    #[test]
    fn quarter_turns_compose() {
        assert_eq!(add(S, S), W);
        assert_eq!(add(W, S), N);
        assert_eq!(add(N, S), E);
        assert_eq!(add(NW, 2), NE);
    }

    #[test]
    fn mirrors_are_involutions() {
        for m in [MIRROR_VERTICAL, MAIN_DIAGONAL, MIRROR_HORIZONTAL, REVERSE_DIAGONAL] {
            assert_eq!(add(m, m), E);
        }
    }

    #[test]
    fn vertical_elements_swap_axes() {
        assert!(is_vertical(S));
        assert!(is_vertical(N));
        assert!(!is_vertical(E));
        assert!(!is_vertical(W));
    }
}

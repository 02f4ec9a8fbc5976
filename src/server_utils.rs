use rand::Rng as _;

/// Player color palette; slots are reserved per connection and returned when
/// the player leaves. With every slot taken, newcomers get a random color.
pub const PLAYER_COLORS: [u32; 8] = [
    0xff0000, // red
    0x0000ff, // blue
    0x00ff00, // green
    0xffff00, // yellow
    0xff00ff, // magenta
    0x00ffff, // cyan
    0xffa500, // orange
    0x800080, // purple
];

#[derive(Clone, Debug, Default)]
pub struct ColorPool {
    used: [bool; PLAYER_COLORS.len()],
}

impl ColorPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> u32 {
        for (index, taken) in self.used.iter_mut().enumerate() {
            if !*taken {
                *taken = true;
                return PLAYER_COLORS[index];
            }
        }
        rand::rng().random_range(0..0xff_ff_ff)
    }

    /// Releasing an unknown or already-free color is a no-op, so disconnect
    /// handling stays idempotent.
    pub fn release(&mut self, color: u32) {
        if let Some(index) = PLAYER_COLORS.iter().position(|&c| c == color) {
            self.used[index] = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_palette_colors_in_order() {
        let mut pool = ColorPool::new();
        assert_eq!(pool.allocate(), PLAYER_COLORS[0]);
        assert_eq!(pool.allocate(), PLAYER_COLORS[1]);
    }

    #[test]
    fn released_colors_are_reused() {
        let mut pool = ColorPool::new();
        let first = pool.allocate();
        let _second = pool.allocate();
        pool.release(first);
        assert_eq!(pool.allocate(), first);
    }

    #[test]
    fn exhausted_pool_falls_back_to_random_colors() {
        let mut pool = ColorPool::new();
        for _ in 0..PLAYER_COLORS.len() {
            let _ = pool.allocate();
        }
        let fallback = pool.allocate();
        assert!(fallback <= 0xff_ff_ff);
    }

    #[test]
    fn releasing_twice_is_idempotent() {
        let mut pool = ColorPool::new();
        let first = pool.allocate();
        pool.release(first);
        pool.release(first);
        assert_eq!(pool.allocate(), first);
        assert_eq!(pool.allocate(), PLAYER_COLORS[1]);
    }
}

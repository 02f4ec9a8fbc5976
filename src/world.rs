use crate::constants::MIN_GRID_SIZE;
use crate::rng::Rng;
use crate::types::{PathCoord, Vec3, WorldInit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellState {
    Buildable,
    Path,
}

/// The arena for one game instance: an N×N grid plus the single enemy route
/// from the top edge to the bottom edge. Generated once, server-side, and
/// shipped to clients in the init payload.
#[derive(Clone, Debug)]
pub struct GeneratedWorld {
    pub size: i32,
    cells: Vec<CellState>,
    pub path: Vec<PathCoord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WalkDirection {
    Left,
    Right,
    Down,
}

pub fn generate_world(size: i32, seed: u32) -> GeneratedWorld {
    assert!(
        size >= MIN_GRID_SIZE,
        "grid size {size} below minimum {MIN_GRID_SIZE}; the run-length policy would starve"
    );

    let mut rng = Rng::new(seed);
    let mut cells = vec![CellState::Buildable; (size * size) as usize];
    let mut path = Vec::new();

    let mut cur_x = size / 2;
    let mut cur_y = 0;
    let mut direction = WalkDirection::Down;
    let mut run_length = 0u32;
    let mut force_change = false;

    cells[(cur_y * size + cur_x) as usize] = CellState::Path;
    path.push(PathCoord { x: cur_x, y: cur_y });

    while cur_y < size - 1 {
        // A horizontal step into the edge or an existing path cell is never
        // taken; it forces a direction change instead. Down is never blocked
        // before the final row.
        force_change |= match direction {
            WalkDirection::Left => {
                cur_x - 1 < 0 || cells[(cur_y * size + cur_x - 1) as usize] == CellState::Path
            }
            WalkDirection::Right => {
                cur_x + 1 >= size || cells[(cur_y * size + cur_x + 1) as usize] == CellState::Path
            }
            WalkDirection::Down => false,
        };

        if run_length < 4 && !force_change {
            run_length += 1;
        } else {
            let coin = rng.int(0, 1) == 0;
            if coin || force_change || run_length > 7 {
                run_length = 0;
                force_change = false;
                direction = next_direction(direction, cur_x, size, &mut rng);
            }
            run_length += 1;
        }

        match direction {
            WalkDirection::Left if cur_x > 0 => cur_x -= 1,
            WalkDirection::Right if cur_x < size - 1 => cur_x += 1,
            WalkDirection::Down if cur_y < size - 1 => cur_y += 1,
            _ => {}
        }

        cells[(cur_y * size + cur_x) as usize] = CellState::Path;
        path.push(PathCoord { x: cur_x, y: cur_y });
    }

    GeneratedWorld { size, cells, path }
}

/// A left/right run always collapses back to down; from down the next leg is
/// a uniform pick filtered to in-bounds moves.
fn next_direction(
    current: WalkDirection,
    cur_x: i32,
    size: i32,
    rng: &mut Rng,
) -> WalkDirection {
    if current != WalkDirection::Down {
        return WalkDirection::Down;
    }
    match rng.int(0, 2) {
        0 if cur_x > 0 => WalkDirection::Left,
        1 if cur_x < size - 1 => WalkDirection::Right,
        _ => WalkDirection::Down,
    }
}

impl GeneratedWorld {
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.size && y < self.size
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<CellState> {
        if !self.in_bounds(x, y) {
            return None;
        }
        Some(self.cells[(y * self.size + x) as usize])
    }

    pub fn is_path_cell(&self, x: i32, y: i32) -> bool {
        self.cell(x, y) == Some(CellState::Path)
    }

    pub fn entrance(&self) -> PathCoord {
        self.path[0]
    }

    pub fn exit(&self) -> PathCoord {
        self.path[self.path.len() - 1]
    }

    pub fn from_init(init: &WorldInit) -> Option<Self> {
        let size = init.size;
        if size < MIN_GRID_SIZE || init.cells.len() != size as usize {
            return None;
        }
        let mut cells = Vec::with_capacity((size * size) as usize);
        for row in &init.cells {
            if row.len() != size as usize {
                return None;
            }
            for ch in row.chars() {
                cells.push(match ch {
                    '.' => CellState::Buildable,
                    '#' => CellState::Path,
                    _ => return None,
                });
            }
        }
        if init.path.len() < 2 {
            return None;
        }
        Some(Self {
            size,
            cells,
            path: init.path.clone(),
        })
    }
}

pub fn to_world_init(world: &GeneratedWorld) -> WorldInit {
    let mut rows = Vec::with_capacity(world.size as usize);
    for y in 0..world.size {
        let mut row = String::with_capacity(world.size as usize);
        for x in 0..world.size {
            row.push(match world.cells[(y * world.size + x) as usize] {
                CellState::Buildable => '.',
                CellState::Path => '#',
            });
        }
        rows.push(row);
    }
    WorldInit {
        size: world.size,
        cells: rows,
        path: world.path.clone(),
    }
}

/// Center of a tile in world coordinates (grid centered on the origin).
pub fn tile_center(size: i32, coord: PathCoord) -> Vec3 {
    Vec3 {
        x: (coord.x - size / 2) as f32 + 0.5,
        y: 0.0,
        z: (coord.y - size / 2) as f32 + 0.5,
    }
}

pub fn world_to_tile(size: i32, x: f32, z: f32) -> Option<(i32, i32)> {
    let tx = (x + size as f32 / 2.0).floor() as i32;
    let ty = (z + size as f32 / 2.0).floor() as i32;
    if tx < 0 || ty < 0 || tx >= size || ty >= size {
        return None;
    }
    Some((tx, ty))
}

pub fn clamp_to_bounds(size: i32, position: Vec3) -> Vec3 {
    let half = size as f32 / 2.0;
    Vec3 {
        x: position.x.clamp(-half, half),
        y: position.y,
        z: position.z.clamp(-half, half),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn path_is_simple_and_spans_the_grid() {
        for &size in &[10, 25, 50] {
            for seed in 0..200u32 {
                let world = generate_world(size, seed);
                let first = world.entrance();
                let last = world.exit();
                assert_eq!(first.y, 0);
                assert_eq!(first.x, size / 2);
                assert_eq!(last.y, size - 1);

                let mut seen = HashSet::new();
                for window in world.path.windows(2) {
                    let step = (window[1].x - window[0].x).abs()
                        + (window[1].y - window[0].y).abs();
                    assert_eq!(
                        step, 1,
                        "non-adjacent step: size={size}, seed={seed}, {:?} -> {:?}",
                        window[0], window[1]
                    );
                }
                for coord in &world.path {
                    assert!(world.in_bounds(coord.x, coord.y));
                    assert!(
                        seen.insert((coord.x, coord.y)),
                        "path revisits cell: size={size}, seed={seed}, pos=({},{})",
                        coord.x,
                        coord.y
                    );
                }
            }
        }
    }

    #[test]
    fn cells_and_path_agree() {
        for seed in 0..100u32 {
            let world = generate_world(50, seed);
            let path_cells: HashSet<(i32, i32)> =
                world.path.iter().map(|c| (c.x, c.y)).collect();
            for y in 0..world.size {
                for x in 0..world.size {
                    let expected = path_cells.contains(&(x, y));
                    assert_eq!(world.is_path_cell(x, y), expected);
                }
            }
        }
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let a = generate_world(50, 1234);
        let b = generate_world(50, 1234);
        assert_eq!(a.path, b.path);
        let c = generate_world(50, 1235);
        assert_ne!(a.path, c.path);
    }

    #[test]
    fn horizontal_runs_are_bounded() {
        for seed in 0..200u32 {
            let world = generate_world(50, seed);
            let mut run = 0;
            for window in world.path.windows(2) {
                if window[1].y == window[0].y {
                    run += 1;
                    assert!(
                        run <= 9,
                        "horizontal run too long: seed={seed}, len={run}"
                    );
                } else {
                    run = 0;
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "below minimum")]
    fn tiny_grids_are_rejected() {
        let _ = generate_world(8, 1);
    }

    #[test]
    fn init_round_trip_preserves_world() {
        let world = generate_world(25, 77);
        let init = to_world_init(&world);
        let restored = GeneratedWorld::from_init(&init).expect("init should parse back");
        assert_eq!(restored.size, world.size);
        assert_eq!(restored.path, world.path);
        for y in 0..world.size {
            for x in 0..world.size {
                assert_eq!(restored.cell(x, y), world.cell(x, y));
            }
        }
    }

    #[test]
    fn tile_mapping_round_trips() {
        let size = 50;
        for &(x, y) in &[(0, 0), (25, 0), (49, 49), (12, 37)] {
            let center = tile_center(size, PathCoord { x, y });
            assert_eq!(world_to_tile(size, center.x, center.z), Some((x, y)));
        }
        assert_eq!(world_to_tile(size, -26.0, 0.0), None);
        assert_eq!(world_to_tile(size, 0.0, 25.5), None);
    }

    #[test]
    fn clamping_keeps_positions_inside_the_arena() {
        let clamped = clamp_to_bounds(50, Vec3::new(-40.0, 1.0, 99.0));
        assert_eq!(clamped.x, -25.0);
        assert_eq!(clamped.z, 25.0);
        assert_eq!(clamped.y, 1.0);
    }
}

mod util;

use mesh_blocks::decomposition::regular::{coords_to_gid, gid_to_coords};
use mesh_blocks::decomposition::{DecomposerOptions, RegularDecomposer};
use proptest::prelude::*;
use util::*;

fn decomposer(extent: Vec<i64>, nblocks: usize, wrap: bool) -> Option<RegularDecomposer<i64>> {
    let dim = extent.len();
    let min = vec![0i64; dim];
    let opts = DecomposerOptions {
        wrap: vec![wrap; dim],
        ..Default::default()
    };
    RegularDecomposer::new(discrete(&min, &extent), nblocks, opts).ok()
}

proptest! {
    #[test]
    fn divisions_multiply_to_nblocks(
        extent in prop::collection::vec(64i64..512, 1..=3),
        nblocks in 1usize..=64,
    ) {
        let dec = decomposer(extent, nblocks, false).unwrap();
        prop_assert_eq!(dec.divisions().iter().product::<usize>(), nblocks);
    }

    #[test]
    fn coordinates_roundtrip(
        divisions in prop::collection::vec(1usize..6, 1..=4),
        seed in any::<usize>(),
    ) {
        let total: usize = divisions.iter().product();
        let gid = seed % total;
        let coords = gid_to_coords(gid, &divisions);
        prop_assert!(coords.iter().zip(&divisions).all(|(c, d)| c < d));
        prop_assert_eq!(coords_to_gid(&coords, &divisions), gid);
    }

    #[test]
    fn cores_tile_the_domain(
        extent in prop::collection::vec(16i64..128, 1..=2),
        nblocks in 1usize..=16,
    ) {
        let dec = decomposer(extent.clone(), nblocks, false).unwrap();
        let mut cells = vec![0u32; extent.iter().map(|&e| (e + 1) as usize).product()];
        for gid in 0..nblocks {
            let (core, _) = dec.block_bounds(gid);
            match extent.len() {
                1 => {
                    for x in core.min[0]..=core.max[0] {
                        cells[x as usize] += 1;
                    }
                }
                _ => {
                    let w = (extent[0] + 1) as usize;
                    for y in core.min[1]..=core.max[1] {
                        for x in core.min[0]..=core.max[0] {
                            cells[y as usize * w + x as usize] += 1;
                        }
                    }
                }
            }
        }
        prop_assert!(cells.iter().all(|&c| c == 1));
    }

    #[test]
    fn opposite_edges_are_wrapped_neighbors(
        extent in 32i64..256,
        nblocks in 2usize..=8,
    ) {
        let dec = decomposer(vec![extent], nblocks, true).unwrap();
        let assigner = mesh_blocks::decomposition::ContiguousAssigner::new(1, nblocks);
        let low = dec.point_to_gid(&[0]);
        let high = dec.point_to_gid(&[extent]);
        prop_assert_eq!(low, 0);
        prop_assert_eq!(high, nblocks - 1);
        let link = dec.link(low, &assigner);
        let across = (0..link.neighbors().len())
            .any(|i| link.neighbors()[i].gid == high && !link.wrap(i).is_zero());
        prop_assert!(across);
    }

    #[test]
    fn links_are_symmetric(nblocks in 1usize..=12, wrap in any::<bool>()) {
        let dec = decomposer(vec![255, 255], nblocks, wrap).unwrap();
        let assigner = mesh_blocks::decomposition::ContiguousAssigner::new(1, nblocks);
        for gid in 0..nblocks {
            let link = dec.link(gid, &assigner);
            for nb in link.neighbors() {
                let back = dec.link(nb.gid, &assigner);
                prop_assert!(back.neighbors().iter().any(|b| b.gid == gid));
            }
        }
    }
}

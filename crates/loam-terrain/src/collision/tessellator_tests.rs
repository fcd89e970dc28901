use rustc_hash::FxHashMap;

use super::*;

fn point(x: f32, y: f32, z: f32) -> SurfacePoint {
    SurfacePoint {
        position: Vec3::new(x, y, z),
        normal: Vec3::Y,
        splat: Vec4::new(x, z, 0.0, 0.0),
    }
}

/// Up-facing right triangle of area 2 in the XZ plane.
fn flat_triangle() -> [SurfacePoint; 3] {
    [point(0.0, 0.0, 0.0), point(0.0, 0.0, 2.0), point(2.0, 0.0, 2.0)]
}

fn tessellate(edges: [u32; 3]) -> TessellatedMesh {
    let mut out = TessellatedMesh::default();
    tessellate_triangle(&flat_triangle(), edges, &mut out);
    out
}

fn triangles(mesh: &TessellatedMesh) -> impl Iterator<Item = [u32; 3]> + '_ {
    mesh.indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]])
}

/// Undirected edge → number of triangles using it.
fn edge_usage(mesh: &TessellatedMesh) -> FxHashMap<(u32, u32), usize> {
    let mut usage = FxHashMap::default();
    for [a, b, c] in triangles(mesh) {
        for (u, v) in [(a, b), (b, c), (c, a)] {
            *usage.entry((u.min(v), u.max(v))).or_insert(0) += 1;
        }
    }
    usage
}

fn signed_area_y(mesh: &TessellatedMesh, [a, b, c]: [u32; 3]) -> f32 {
    let (pa, pb, pc) = (
        mesh.positions[a as usize],
        mesh.positions[b as usize],
        mesh.positions[c as usize],
    );
    (pb - pa).cross(pc - pa).y * 0.5
}

/// Which coarse edge (0→1, 1→2, 2→0) a point lies on, if any.
fn coarse_edge_of(p: Vec3) -> Option<usize> {
    const EPS: f32 = 1e-5;
    if p.x.abs() < EPS {
        Some(0)
    } else if (p.z - 2.0).abs() < EPS {
        Some(1)
    } else if (p.x - p.z).abs() < EPS {
        Some(2)
    } else {
        None
    }
}

const CASES: [[u32; 3]; 8] = [
    [2, 2, 2],
    [4, 4, 4],
    [1, 1, 2],
    [1, 3, 2],
    [7, 1, 1],
    [3, 5, 8],
    [16, 16, 16],
    [2, 9, 4],
];

#[test]
fn test_edge_subdivisions() {
    assert_eq!(edge_subdivisions(10.0, 3.0), 4);
    assert_eq!(edge_subdivisions(3.0, 3.0), 1);
    assert_eq!(edge_subdivisions(3.001, 3.0), 2);
    assert_eq!(edge_subdivisions(0.0, 1.0), 1);
    assert_eq!(edge_subdivisions(-4.0, 1.0), 1);
    assert_eq!(edge_subdivisions(f32::NAN, 1.0), 1);
    assert_eq!(edge_subdivisions(f32::INFINITY, 1.0), 1);
    assert_eq!(edge_subdivisions(5.0, 0.0), 1);
}

#[test]
fn test_edge_count_is_clamped_and_symmetric() {
    let settings = TessellationSettings {
        max_edge_length: 1.0,
        max_edge_subdivisions: 5,
        strength_weighted: true,
    };
    let a = Vec3::new(0.3, 1.7, -2.0);
    let b = Vec3::new(3.1, -0.2, 1.9);
    assert_eq!(
        settings.edge_count(a, b, 0.8, 0.3),
        settings.edge_count(b, a, 0.3, 0.8)
    );
    assert_eq!(settings.edge_count(Vec3::ZERO, Vec3::X * 100.0, 1.0, 1.0), 5);
    // Zero strength collapses the edge to a single segment.
    assert_eq!(settings.edge_count(Vec3::ZERO, Vec3::X * 100.0, 0.0, 0.0), 1);

    let unweighted = TessellationSettings {
        strength_weighted: false,
        ..settings
    };
    assert_eq!(unweighted.edge_count(Vec3::ZERO, Vec3::X * 2.5, 0.0, 0.0), 3);
}

#[test]
fn test_unit_edges_pass_triangle_through() {
    let mesh = tessellate([1, 1, 1]);
    assert_eq!(mesh.vertex_count(), 3);
    assert_eq!(mesh.indices, vec![0, 1, 2]);
    let corners = flat_triangle();
    for (i, corner) in corners.iter().enumerate() {
        assert_eq!(mesh.positions[i], corner.position);
        assert_eq!(mesh.normals[i], corner.normal);
        assert_eq!(mesh.splats[i], corner.splat);
    }
}

#[test]
fn test_known_counts() {
    assert_eq!(tessellation_counts([4, 4, 4]), (24, 34));
    assert_eq!(tessellation_counts([2, 2, 2]), (9, 10));
    assert_eq!(tessellation_counts([1, 1, 2]), (5, 4));
    assert_eq!(tessellation_counts([1, 1, 1]), (3, 1));
}

#[test]
fn test_output_matches_counts() {
    for edges in CASES {
        let mesh = tessellate(edges);
        assert_eq!(
            (mesh.vertex_count(), mesh.triangle_count()),
            tessellation_counts(edges),
            "edges {edges:?}"
        );
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertex_count()));
    }
}

#[test]
fn test_output_is_watertight() {
    for edges in CASES {
        let mesh = tessellate(edges);
        let usage = edge_usage(&mesh);
        let boundary: Vec<_> = usage.iter().filter(|&(_, &n)| n == 1).map(|(e, _)| *e).collect();
        assert!(
            usage.values().all(|&n| n == 1 || n == 2),
            "edges {edges:?}: an edge is shared by more than two triangles"
        );
        assert_eq!(
            boundary.len(),
            edges.iter().sum::<u32>() as usize,
            "edges {edges:?}: boundary edge count"
        );

        let mut per_side = [0u32; 3];
        for (u, v) in boundary {
            let midpoint = (mesh.positions[u as usize] + mesh.positions[v as usize]) * 0.5;
            let side = coarse_edge_of(midpoint).expect("boundary edge off the coarse outline");
            per_side[side] += 1;
        }
        assert_eq!(per_side, edges, "edges {edges:?}: segments per coarse edge");
    }
}

#[test]
fn test_winding_is_consistent() {
    for edges in CASES {
        let mesh = tessellate(edges);
        let mut directed = rustc_hash::FxHashSet::default();
        for [a, b, c] in triangles(&mesh) {
            for edge in [(a, b), (b, c), (c, a)] {
                assert!(directed.insert(edge), "edges {edges:?}: directed edge {edge:?} repeats");
            }
            assert!(signed_area_y(&mesh, [a, b, c]) > 0.0, "edges {edges:?}: flipped triangle");
        }
    }
}

#[test]
fn test_area_is_preserved() {
    for edges in CASES {
        let mesh = tessellate(edges);
        let area: f32 = triangles(&mesh).map(|t| signed_area_y(&mesh, t)).sum();
        assert!((area - 2.0).abs() < 1e-4, "edges {edges:?}: area {area}");
    }
}

#[test]
fn test_attributes_follow_positions() {
    let mesh = tessellate([3, 5, 8]);
    for (p, s) in mesh.positions.iter().zip(&mesh.splats) {
        assert!((s.x - p.x).abs() < 1e-5 && (s.y - p.z).abs() < 1e-5);
    }
    assert!(mesh.normals.iter().all(|n| (*n - Vec3::Y).length() < 1e-6));
}

#[test]
fn test_grid_tessellation_is_crack_free() {
    let size = 4u32;
    let mut points = Vec::new();
    let mut strengths = Vec::new();
    for y in 0..size {
        for x in 0..size {
            let h = ((x * 7 + y * 3) % 5) as f32 * 0.4;
            points.push(SurfacePoint {
                position: Vec3::new(x as f32 * 2.0, h, y as f32 * 2.0),
                normal: Vec3::Y,
                splat: Vec4::X,
            });
            strengths.push(0.25 + ((x + 2 * y) % 4) as f32 * 0.25);
        }
    }
    let mut tessellator = AdaptiveTessellator::new(TessellationSettings {
        max_edge_length: 0.7,
        max_edge_subdivisions: 16,
        strength_weighted: true,
    });
    let mut mesh = TessellatedMesh::default();
    tessellator.tessellate_grid(size, &points, &strengths, &mut mesh);
    assert_eq!(tessellator.templates().cached_size(), Some(size));

    // Key edges by exact vertex bits: shared coarse edges must produce identical points.
    let key = |i: u32| mesh.positions[i as usize].to_array().map(f32::to_bits);
    let mut usage: FxHashMap<([u32; 3], [u32; 3]), usize> = FxHashMap::default();
    for [a, b, c] in triangles(&mesh) {
        for (u, v) in [(a, b), (b, c), (c, a)] {
            let (ku, kv) = (key(u), key(v));
            *usage.entry((ku.min(kv), ku.max(kv))).or_insert(0) += 1;
        }
    }
    let on_perimeter = |p: [u32; 3]| {
        let x = f32::from_bits(p[0]);
        let z = f32::from_bits(p[2]);
        [x, z].iter().any(|c| c.abs() < 1e-4 || (c - 6.0).abs() < 1e-4)
    };
    for ((u, v), n) in usage {
        if on_perimeter(u) && on_perimeter(v) && n == 1 {
            continue;
        }
        assert_eq!(n, 2, "edge {:?} -> {:?} is open", u, v);
    }
}

#[test]
fn test_grid_size_mismatch_produces_nothing() {
    let mut tessellator = AdaptiveTessellator::new(TessellationSettings {
        max_edge_length: 1.0,
        max_edge_subdivisions: 4,
        strength_weighted: false,
    });
    let mut mesh = TessellatedMesh::default();
    tessellator.tessellate_grid(3, &[SurfacePoint::default(); 4], &[1.0; 4], &mut mesh);
    assert_eq!(mesh.vertex_count(), 0);
}

#[test]
fn test_template_cache_invalidation() {
    let mut cache = GridTemplateCache::default();
    assert_eq!(cache.template(3).len(), 2 * 2 * 6);
    assert_eq!(cache.cached_size(), Some(3));
    assert_eq!(cache.template(5).len(), 4 * 4 * 6);
    cache.invalidate();
    assert_eq!(cache.cached_size(), None);

    let mut tessellator = AdaptiveTessellator::new(TessellationSettings {
        max_edge_length: 1.0,
        max_edge_subdivisions: 4,
        strength_weighted: false,
    });
    let mut mesh = TessellatedMesh::default();
    tessellator.tessellate_grid(2, &[SurfacePoint::default(); 4], &[1.0; 4], &mut mesh);
    assert_eq!(tessellator.templates().cached_size(), Some(2));
    tessellator.set_settings(*tessellator.settings());
    assert_eq!(tessellator.templates().cached_size(), None);
}

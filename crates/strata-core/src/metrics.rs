//! The metrics calculus.
//!
//! Every datatype tree node carries a block of derived values describing its
//! memory footprint: how many meaningful bytes it holds, how far apart
//! consecutive elements sit, the tightest interval its bytes occupy, and how
//! fragmented one element is. Each constructor kind derives its block from
//! its children through the pure functions in this module; nothing here
//! touches nodes, handles, or backends.

use serde::Serialize;

/// Dimension ordering of a subarray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Order {
    /// Row-major: the last dimension varies fastest.
    C,
    /// Column-major: the first dimension varies fastest.
    Fortran,
}

/// Derived layout metrics of one datatype tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Metrics {
    /// Total bytes of meaningful data in one element.
    pub size: usize,
    /// Byte stride between consecutive elements of an array of this type
    /// (`ub - lb`).
    pub extent: isize,
    /// Logical lower bound.
    pub lb: isize,
    /// Logical upper bound.
    pub ub: isize,
    /// Lowest byte offset one element actually references.
    pub true_lb: isize,
    /// One past the highest byte offset one element actually references.
    pub true_ub: isize,
    /// Maximum alignment required by any leaf.
    pub alignment: usize,
    /// One element is a single gapless run and `size == extent`.
    pub is_contig: bool,
    /// Number of maximal contiguous runs in one element.
    pub num_contig: usize,
    /// Levels of nesting below this node; builtins are 0.
    pub tree_depth: usize,
}

/// Bounds of the union of `[lo, hi)` translated by `k * step` for `k` in
/// `0..n`. Collapses to `(lo, hi)` for `n == 1` and handles negative steps.
fn span(n: usize, step: isize, lo: isize, hi: isize) -> (isize, isize) {
    debug_assert!(n > 0);
    let reach = (n - 1) as isize * step;
    if step >= 0 {
        (lo, reach + hi)
    } else {
        (reach + lo, hi)
    }
}

impl Metrics {
    /// Metrics of a predefined primitive: one gapless run of `size` bytes.
    pub fn builtin(size: usize, alignment: usize) -> Self {
        Metrics {
            size,
            extent: size as isize,
            lb: 0,
            ub: size as isize,
            true_lb: 0,
            true_ub: size as isize,
            alignment,
            is_contig: true,
            num_contig: 1,
            tree_depth: 0,
        }
    }

    /// The zero-size type produced by `count == 0` constructors.
    pub fn empty(alignment: usize, tree_depth: usize) -> Self {
        Metrics {
            size: 0,
            extent: 0,
            lb: 0,
            ub: 0,
            true_lb: 0,
            true_ub: 0,
            alignment,
            is_contig: true,
            num_contig: 1,
            tree_depth,
        }
    }

    /// `count` consecutive elements of `child`, stepped by `child.extent`.
    pub fn contig(count: usize, child: &Metrics) -> Self {
        let tree_depth = child.tree_depth + 1;
        if count == 0 {
            return Metrics::empty(child.alignment, tree_depth);
        }

        let size = count * child.size;
        let extent = count as isize * child.extent;
        let (true_lb, true_ub) = if size == 0 {
            (0, 0)
        } else {
            span(count, child.extent, child.true_lb, child.true_ub)
        };
        let is_contig = if size == 0 {
            extent == 0
        } else {
            child.is_contig && child.size as isize == child.extent
        };
        Metrics {
            size,
            extent,
            lb: child.lb,
            ub: child.lb + extent,
            true_lb,
            true_ub,
            alignment: child.alignment,
            is_contig,
            num_contig: if is_contig || size == 0 {
                child.num_contig
            } else {
                count * child.num_contig
            },
            tree_depth,
        }
    }

    /// `count` blocks of `blocklen` child elements, block `i` displaced by
    /// `i * stride` bytes. The stride may be negative or smaller than a
    /// block.
    pub fn hvector(count: usize, blocklen: usize, stride: isize, child: &Metrics) -> Self {
        let tree_depth = child.tree_depth + 1;
        if count == 0 {
            return Metrics::empty(child.alignment, tree_depth);
        }

        let size = count * blocklen * child.size;
        if size == 0 {
            // Blocks reference nothing; only the stepping survives.
            let extent = (count - 1) as isize * stride + blocklen as isize * child.extent;
            return Metrics {
                size: 0,
                extent,
                lb: 0,
                ub: extent,
                true_lb: 0,
                true_ub: 0,
                alignment: child.alignment,
                is_contig: extent == 0,
                num_contig: 1,
                tree_depth,
            };
        }

        let (block_lo, block_hi) = span(blocklen, child.extent, child.lb, child.ub);
        let (lb, ub) = span(count, stride, block_lo, block_hi);
        let (tblock_lo, tblock_hi) = span(blocklen, child.extent, child.true_lb, child.true_ub);
        let (true_lb, true_ub) = span(count, stride, tblock_lo, tblock_hi);

        let is_contig = child.is_contig
            && child.size as isize == child.extent
            && stride == blocklen as isize * child.extent;
        Metrics {
            size,
            extent: ub - lb,
            lb,
            ub,
            true_lb,
            true_ub,
            alignment: child.alignment,
            is_contig,
            num_contig: if is_contig {
                1
            } else {
                count * blocklen * child.num_contig
            },
            tree_depth,
        }
    }

    /// Blocks of child elements at explicit byte displacements. Each entry
    /// of `blocks` is `(blocklen, displacement)`.
    pub fn hindexed(blocks: &[(usize, isize)], child: &Metrics) -> Self {
        let tree_depth = child.tree_depth + 1;
        if blocks.is_empty() {
            return Metrics::empty(child.alignment, tree_depth);
        }

        let size: usize = blocks.iter().map(|&(bl, _)| bl * child.size).sum();
        if size == 0 {
            return Metrics {
                size: 0,
                extent: 0,
                lb: 0,
                ub: 0,
                true_lb: 0,
                true_ub: 0,
                alignment: child.alignment,
                is_contig: true,
                num_contig: 1,
                tree_depth,
            };
        }

        let mut bounds: Option<(isize, isize, isize, isize)> = None;
        let mut tiles = true;
        let mut next_disp = None;
        for &(bl, disp) in blocks {
            if bl == 0 {
                continue;
            }
            let (blo, bhi) = span(bl, child.extent, child.lb, child.ub);
            let (tlo, thi) = span(bl, child.extent, child.true_lb, child.true_ub);
            bounds = Some(match bounds {
                None => (disp + blo, disp + bhi, disp + tlo, disp + thi),
                Some((lb, ub, tlb, tub)) => (
                    lb.min(disp + blo),
                    ub.max(disp + bhi),
                    tlb.min(disp + tlo),
                    tub.max(disp + thi),
                ),
            });
            match next_disp {
                None => {}
                Some(expected) => tiles = tiles && disp == expected,
            }
            next_disp = Some(disp + bl as isize * child.extent);
        }
        let (lb, ub, true_lb, true_ub) = bounds.unwrap_or((0, 0, 0, 0));
        let extent = ub - lb;

        let is_contig = child.is_contig
            && child.size as isize == child.extent
            && tiles
            && size as isize == extent;
        Metrics {
            size,
            extent,
            lb,
            ub,
            true_lb,
            true_ub,
            alignment: child.alignment,
            is_contig,
            num_contig: if is_contig {
                1
            } else {
                blocks.iter().map(|&(bl, _)| bl * child.num_contig).sum()
            },
            tree_depth,
        }
    }

    /// Heterogeneous blocks: `(blocklen, displacement, child metrics)` per
    /// field, packed in declaration order.
    pub fn strukt(fields: &[(usize, isize, Metrics)]) -> Self {
        let tree_depth = 1 + fields.iter().map(|f| f.2.tree_depth).max().unwrap_or(0);
        let alignment = fields.iter().map(|f| f.2.alignment).max().unwrap_or(1);
        if fields.is_empty() {
            return Metrics::empty(alignment, tree_depth);
        }

        let size: usize = fields.iter().map(|&(bl, _, ref c)| bl * c.size).sum();
        if size == 0 {
            return Metrics {
                size: 0,
                extent: 0,
                lb: 0,
                ub: 0,
                true_lb: 0,
                true_ub: 0,
                alignment,
                is_contig: true,
                num_contig: 1,
                tree_depth,
            };
        }

        let mut bounds: Option<(isize, isize, isize, isize)> = None;
        let mut tiles = true;
        let mut next_disp = None;
        for &(bl, disp, ref c) in fields {
            if bl == 0 || c.size == 0 {
                continue;
            }
            let (blo, bhi) = span(bl, c.extent, c.lb, c.ub);
            let (tlo, thi) = span(bl, c.extent, c.true_lb, c.true_ub);
            bounds = Some(match bounds {
                None => (disp + blo, disp + bhi, disp + tlo, disp + thi),
                Some((lb, ub, tlb, tub)) => (
                    lb.min(disp + blo),
                    ub.max(disp + bhi),
                    tlb.min(disp + tlo),
                    tub.max(disp + thi),
                ),
            });
            tiles = tiles && c.is_contig && c.size as isize == c.extent;
            match next_disp {
                None => {}
                Some(expected) => tiles = tiles && disp == expected,
            }
            next_disp = Some(disp + bl as isize * c.extent);
        }
        let (lb, ub, true_lb, true_ub) = bounds.unwrap_or((0, 0, 0, 0));
        let extent = ub - lb;

        let is_contig = tiles && size as isize == extent;
        Metrics {
            size,
            extent,
            lb,
            ub,
            true_lb,
            true_ub,
            alignment,
            is_contig,
            num_contig: if is_contig {
                1
            } else {
                fields.iter().map(|&(bl, _, ref c)| bl * c.num_contig).sum()
            },
            tree_depth,
        }
    }

    /// Same data as `child` with overridden logical bounds. True bounds are
    /// untouched: resizing changes stepping, never the bytes referenced.
    pub fn resized(child: &Metrics, lb: isize, extent: isize) -> Self {
        let is_contig = child.is_contig && extent == child.size as isize && lb == child.true_lb;
        Metrics {
            size: child.size,
            extent,
            lb,
            ub: lb + extent,
            true_lb: child.true_lb,
            true_ub: child.true_ub,
            alignment: child.alignment,
            is_contig,
            num_contig: child.num_contig,
            tree_depth: child.tree_depth + 1,
        }
    }

    /// An n-dimensional sub-box of an n-dimensional array of `child`
    /// elements. `nest` is the hvector nest that realizes the sub-box
    /// pattern; the node-level metrics describe the full outer box.
    pub fn subarray(
        child: &Metrics,
        nest: &Metrics,
        sizes: &[usize],
        subsizes: &[usize],
        starts: &[usize],
        order: Order,
    ) -> Self {
        let ndims = sizes.len();
        debug_assert!(ndims > 0 && subsizes.len() == ndims && starts.len() == ndims);

        let mut extent = child.extent;
        for &s in sizes {
            extent *= s as isize;
        }
        let mut size = child.size;
        for &s in subsizes {
            size *= s;
        }

        let mut true_lb = child.true_lb;
        let mut true_ub = child.true_ub;
        for i in 0..ndims {
            let mut lo = starts[i] as isize * child.extent;
            let mut hi = (starts[i] + subsizes[i].max(1) - 1) as isize * child.extent;
            match order {
                Order::C => {
                    for &s in &sizes[i + 1..] {
                        lo *= s as isize;
                        hi *= s as isize;
                    }
                }
                Order::Fortran => {
                    for &s in &sizes[..i] {
                        lo *= s as isize;
                        hi *= s as isize;
                    }
                }
            }
            true_lb += lo;
            true_ub += hi;
        }
        if size == 0 {
            true_lb = 0;
            true_ub = 0;
        }

        let mut is_contig = child.is_contig && extent == size as isize;
        if is_contig {
            for i in 0..ndims {
                if starts[i] != 0 || subsizes[i] != sizes[i] {
                    is_contig = false;
                    break;
                }
            }
        }

        Metrics {
            size,
            extent,
            lb: 0,
            ub: extent,
            true_lb,
            true_ub,
            alignment: child.alignment,
            is_contig,
            num_contig: nest.num_contig,
            tree_depth: child.tree_depth + 1,
        }
    }
}

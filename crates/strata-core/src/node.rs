//! Datatype tree nodes and their constructors.
//!
//! A node is immutable once built: constructors derive the metrics block,
//! give every registered backend a chance to attach cached state, and hand
//! back an `Arc`. Children are retained by sharing, so a node may sit under
//! several parents and survives until the last parent (or handle-table
//! entry) lets go.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::builtin::Builtin;
use crate::error::LayoutError;
use crate::metrics::{Metrics, Order};

/// Per-backend cached state attached to a node by the create hook
/// (e.g. a compiled pack kernel).
pub type BackendState = Box<dyn Any + Send + Sync>;

/// Lifecycle hooks fanned out to registered backends when a node is built
/// or destroyed. The backend registry implements this; detached factories
/// (tests, offline tools) run without hooks.
pub trait TypeHooks: Send + Sync {
    /// Attach per-backend state to a freshly built, not yet shared node.
    /// An error aborts construction.
    fn type_create(&self, node: &mut TypeNode) -> Result<(), String>;

    /// Release per-backend state. Invoked from the node's drop.
    fn type_free(&self, node: &TypeNode);
}

/// One block of an hindexed type: `blocklen` child elements at `disp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub blocklen: usize,
    pub disp: isize,
}

/// One field of a struct type.
#[derive(Clone)]
pub struct Field {
    pub blocklen: usize,
    pub disp: isize,
    pub child: Arc<TypeNode>,
}

/// The kind-specific payload of a node. Dup is absent on purpose: duping
/// shares the existing node under a new handle instead of building one.
pub enum TypeKind {
    Builtin(Builtin),
    Contig {
        count: usize,
        child: Arc<TypeNode>,
    },
    Hvector {
        count: usize,
        blocklen: usize,
        stride: isize,
        child: Arc<TypeNode>,
    },
    Hindexed {
        blocks: Vec<Block>,
        child: Arc<TypeNode>,
    },
    BlkHindexed {
        blocklen: usize,
        displs: Vec<isize>,
        child: Arc<TypeNode>,
    },
    Struct {
        fields: Vec<Field>,
    },
    Resized {
        child: Arc<TypeNode>,
    },
    Subarray {
        sizes: Vec<usize>,
        subsizes: Vec<usize>,
        starts: Vec<usize>,
        order: Order,
        /// The hvector nest realizing the sub-box pattern; walking goes
        /// through here.
        nest: Arc<TypeNode>,
    },
}

impl TypeKind {
    pub fn name(&self) -> &'static str {
        match self {
            TypeKind::Builtin(_) => "builtin",
            TypeKind::Contig { .. } => "contig",
            TypeKind::Hvector { .. } => "hvector",
            TypeKind::Hindexed { .. } => "hindexed",
            TypeKind::BlkHindexed { .. } => "blkhindx",
            TypeKind::Struct { .. } => "struct",
            TypeKind::Resized { .. } => "resized",
            TypeKind::Subarray { .. } => "subarray",
        }
    }
}

/// A datatype tree node.
pub struct TypeNode {
    kind: TypeKind,
    metrics: Metrics,
    backend_state: Vec<Option<BackendState>>,
    hooks: Option<Arc<dyn TypeHooks>>,
}

impl TypeNode {
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn size(&self) -> usize {
        self.metrics.size
    }

    pub fn extent(&self) -> isize {
        self.metrics.extent
    }

    pub fn lb(&self) -> isize {
        self.metrics.lb
    }

    pub fn ub(&self) -> isize {
        self.metrics.ub
    }

    pub fn true_lb(&self) -> isize {
        self.metrics.true_lb
    }

    pub fn true_ub(&self) -> isize {
        self.metrics.true_ub
    }

    pub fn alignment(&self) -> usize {
        self.metrics.alignment
    }

    pub fn is_contig(&self) -> bool {
        self.metrics.is_contig
    }

    pub fn num_contig(&self) -> usize {
        self.metrics.num_contig
    }

    pub fn tree_depth(&self) -> usize {
        self.metrics.tree_depth
    }

    /// Cached state attached by the backend registered at `slot`.
    pub fn backend_state(&self, slot: usize) -> Option<&(dyn Any + Send + Sync)> {
        self.backend_state
            .get(slot)
            .and_then(|s| s.as_deref())
    }

    /// Store one backend's state. Only meaningful from a create hook,
    /// before the node is shared.
    pub fn set_backend_state(&mut self, slot: usize, state: Option<BackendState>) {
        if self.backend_state.len() <= slot {
            self.backend_state.resize_with(slot + 1, || None);
        }
        self.backend_state[slot] = state;
    }
}

impl fmt::Debug for TypeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeNode")
            .field("kind", &self.kind.name())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl Drop for TypeNode {
    fn drop(&mut self) {
        // Free hooks run before the child references go; children then
        // cascade through their own drops.
        if let Some(hooks) = self.hooks.take() {
            hooks.type_free(self);
        }
    }
}

/// Builds datatype tree nodes, running the backend lifecycle hooks on each
/// freshly constructed node (the nest inside a subarray included).
#[derive(Clone)]
pub struct TypeFactory {
    hooks: Option<Arc<dyn TypeHooks>>,
}

impl TypeFactory {
    pub fn new(hooks: Arc<dyn TypeHooks>) -> Self {
        TypeFactory { hooks: Some(hooks) }
    }

    /// A factory with no backend hooks; construction and metrics only.
    pub fn detached() -> Self {
        TypeFactory { hooks: None }
    }

    fn finish(&self, kind: TypeKind, metrics: Metrics) -> Result<Arc<TypeNode>, LayoutError> {
        let mut node = TypeNode {
            kind,
            metrics,
            backend_state: Vec::new(),
            hooks: self.hooks.clone(),
        };
        if let Some(hooks) = &self.hooks {
            // On failure the abandoned node drops here, releasing child
            // references and any backend slots already populated.
            hooks
                .type_create(&mut node)
                .map_err(|message| LayoutError::CreateHook { message })?;
        }
        Ok(Arc::new(node))
    }

    pub fn builtin(&self, builtin: Builtin) -> Result<Arc<TypeNode>, LayoutError> {
        self.finish(TypeKind::Builtin(builtin), builtin.metrics())
    }

    pub fn contig(
        &self,
        count: usize,
        child: &Arc<TypeNode>,
    ) -> Result<Arc<TypeNode>, LayoutError> {
        let metrics = Metrics::contig(count, child.metrics());
        self.finish(
            TypeKind::Contig {
                count,
                child: Arc::clone(child),
            },
            metrics,
        )
    }

    pub fn hvector(
        &self,
        count: usize,
        blocklen: usize,
        stride: isize,
        child: &Arc<TypeNode>,
    ) -> Result<Arc<TypeNode>, LayoutError> {
        let metrics = Metrics::hvector(count, blocklen, stride, child.metrics());
        self.finish(
            TypeKind::Hvector {
                count,
                blocklen,
                stride,
                child: Arc::clone(child),
            },
            metrics,
        )
    }

    pub fn hindexed(
        &self,
        blocklens: &[usize],
        displs: &[isize],
        child: &Arc<TypeNode>,
    ) -> Result<Arc<TypeNode>, LayoutError> {
        if blocklens.len() != displs.len() {
            return Err(LayoutError::MismatchedBlocks {
                blocklens: blocklens.len(),
                displs: displs.len(),
            });
        }
        let pairs: Vec<(usize, isize)> = blocklens
            .iter()
            .copied()
            .zip(displs.iter().copied())
            .collect();
        let metrics = Metrics::hindexed(&pairs, child.metrics());
        let blocks = pairs
            .into_iter()
            .map(|(blocklen, disp)| Block { blocklen, disp })
            .collect();
        self.finish(
            TypeKind::Hindexed {
                blocks,
                child: Arc::clone(child),
            },
            metrics,
        )
    }

    pub fn blkhindexed(
        &self,
        blocklen: usize,
        displs: &[isize],
        child: &Arc<TypeNode>,
    ) -> Result<Arc<TypeNode>, LayoutError> {
        let pairs: Vec<(usize, isize)> = displs.iter().map(|&d| (blocklen, d)).collect();
        let metrics = Metrics::hindexed(&pairs, child.metrics());
        self.finish(
            TypeKind::BlkHindexed {
                blocklen,
                displs: displs.to_vec(),
                child: Arc::clone(child),
            },
            metrics,
        )
    }

    pub fn strukt(
        &self,
        blocklens: &[usize],
        displs: &[isize],
        children: &[Arc<TypeNode>],
    ) -> Result<Arc<TypeNode>, LayoutError> {
        if blocklens.len() != displs.len() || blocklens.len() != children.len() {
            return Err(LayoutError::MismatchedFields {
                blocklens: blocklens.len(),
                displs: displs.len(),
                children: children.len(),
            });
        }
        let triples: Vec<(usize, isize, Metrics)> = blocklens
            .iter()
            .zip(displs)
            .zip(children)
            .map(|((&bl, &d), c)| (bl, d, *c.metrics()))
            .collect();
        let metrics = Metrics::strukt(&triples);
        let fields = blocklens
            .iter()
            .zip(displs)
            .zip(children)
            .map(|((&blocklen, &disp), child)| Field {
                blocklen,
                disp,
                child: Arc::clone(child),
            })
            .collect();
        self.finish(TypeKind::Struct { fields }, metrics)
    }

    pub fn resized(
        &self,
        child: &Arc<TypeNode>,
        lb: isize,
        extent: isize,
    ) -> Result<Arc<TypeNode>, LayoutError> {
        let metrics = Metrics::resized(child.metrics(), lb, extent);
        self.finish(
            TypeKind::Resized {
                child: Arc::clone(child),
            },
            metrics,
        )
    }

    /// An n-dimensional sub-box of an array of `child` elements. Built as a
    /// nest of hvectors around a leading contig (fastest-varying dimension
    /// innermost), resized to the full outer box. `ndims == 0` is the
    /// caller's concern (it yields the null type, not a node).
    pub fn subarray(
        &self,
        sizes: &[usize],
        subsizes: &[usize],
        starts: &[usize],
        order: Order,
        child: &Arc<TypeNode>,
    ) -> Result<Arc<TypeNode>, LayoutError> {
        let ndims = sizes.len();
        debug_assert!(ndims > 0);
        if subsizes.len() != ndims || starts.len() != ndims {
            return Err(LayoutError::MismatchedDims {
                sizes: sizes.len(),
                subsizes: subsizes.len(),
                starts: starts.len(),
            });
        }
        for dim in 0..ndims {
            if starts[dim] + subsizes[dim] > sizes[dim] {
                return Err(LayoutError::SubarrayBounds {
                    dim,
                    size: sizes[dim],
                    subsize: subsizes[dim],
                    start: starts[dim],
                });
            }
        }

        // The first dimension walked is really a contig; the rest wrap it
        // in hvectors whose strides accumulate the enclosing sizes.
        let mut stride = child.extent();
        let mut current;
        match order {
            Order::C => {
                current = self.contig(subsizes[ndims - 1], child)?;
                for i in (0..ndims - 1).rev() {
                    stride *= sizes[i + 1] as isize;
                    current = self.hvector(subsizes[i], 1, stride, &current)?;
                }
            }
            Order::Fortran => {
                current = self.contig(subsizes[0], child)?;
                for i in 1..ndims {
                    stride *= sizes[i - 1] as isize;
                    current = self.hvector(subsizes[i], 1, stride, &current)?;
                }
            }
        }

        let mut full_extent = child.extent();
        for &s in sizes {
            full_extent *= s as isize;
        }
        let nest = self.resized(&current, 0, full_extent)?;

        let metrics = Metrics::subarray(
            child.metrics(),
            nest.metrics(),
            sizes,
            subsizes,
            starts,
            order,
        );
        self.finish(
            TypeKind::Subarray {
                sizes: sizes.to_vec(),
                subsizes: subsizes.to_vec(),
                starts: starts.to_vec(),
                order,
                nest,
            },
            metrics,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn int32() -> Arc<TypeNode> {
        TypeFactory::detached().builtin(Builtin::I32).unwrap()
    }

    #[test]
    fn children_are_shared_not_copied() {
        let factory = TypeFactory::detached();
        let leaf = int32();
        assert_eq!(Arc::strong_count(&leaf), 1);

        let a = factory.contig(2, &leaf).unwrap();
        let b = factory.hvector(2, 1, 16, &leaf).unwrap();
        assert_eq!(Arc::strong_count(&leaf), 3);

        drop(a);
        assert_eq!(Arc::strong_count(&leaf), 2);
        drop(b);
        assert_eq!(Arc::strong_count(&leaf), 1);
    }

    #[test]
    fn composite_frees_cascade() {
        let factory = TypeFactory::detached();
        let leaf = int32();
        let a = factory.contig(2, &leaf).unwrap();
        let b = factory.contig(3, &a).unwrap();
        drop(a);
        assert_eq!(Arc::strong_count(&leaf), 2);
        drop(b);
        assert_eq!(Arc::strong_count(&leaf), 1);
    }

    #[test]
    fn mismatched_arguments_are_rejected() {
        let factory = TypeFactory::detached();
        let leaf = int32();
        assert!(matches!(
            factory.hindexed(&[1, 2], &[0], &leaf),
            Err(LayoutError::MismatchedBlocks { .. })
        ));
        assert!(matches!(
            factory.strukt(&[1], &[0, 4], std::slice::from_ref(&leaf)),
            Err(LayoutError::MismatchedFields { .. })
        ));
        assert!(matches!(
            factory.subarray(&[4, 4], &[2], &[0, 0], Order::C, &leaf),
            Err(LayoutError::MismatchedDims { .. })
        ));
        assert!(matches!(
            factory.subarray(&[4], &[3], &[2], Order::C, &leaf),
            Err(LayoutError::SubarrayBounds { .. })
        ));
    }

    #[test]
    fn subarray_nest_shape() {
        let factory = TypeFactory::detached();
        let leaf = int32();
        let sub = factory
            .subarray(&[3, 3], &[2, 2], &[1, 1], Order::C, &leaf)
            .unwrap();

        assert_eq!(sub.size(), 16);
        assert_eq!(sub.extent(), 36);
        assert_eq!(sub.true_lb(), 16);
        assert_eq!(sub.true_ub(), 36);
        // Reported depth counts the element type, not the nest.
        assert_eq!(sub.tree_depth(), 1);

        match sub.kind() {
            TypeKind::Subarray { nest, .. } => {
                assert!(matches!(nest.kind(), TypeKind::Resized { .. }));
                assert_eq!(nest.size(), 16);
            }
            _ => panic!("expected subarray"),
        }
    }

    struct CountingHooks {
        created: AtomicUsize,
        freed: AtomicUsize,
        fail_after: usize,
    }

    impl CountingHooks {
        fn new(fail_after: usize) -> Self {
            CountingHooks {
                created: AtomicUsize::new(0),
                freed: AtomicUsize::new(0),
                fail_after,
            }
        }
    }

    impl TypeHooks for CountingHooks {
        fn type_create(&self, node: &mut TypeNode) -> Result<(), String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_after {
                return Err("synthetic backend failure".into());
            }
            node.set_backend_state(0, Some(Box::new(n)));
            Ok(())
        }

        fn type_free(&self, _node: &TypeNode) {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn create_hook_attaches_state() {
        let hooks = Arc::new(CountingHooks::new(usize::MAX));
        let factory = TypeFactory::new(hooks.clone());
        let leaf = factory.builtin(Builtin::I32).unwrap();
        let node = factory.contig(4, &leaf).unwrap();
        assert!(node.backend_state(0).is_some());
        assert_eq!(hooks.created.load(Ordering::SeqCst), 2);

        drop(node);
        drop(leaf);
        assert_eq!(hooks.freed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_create_hook_releases_children() {
        let hooks = Arc::new(CountingHooks::new(1));
        let factory = TypeFactory::new(hooks.clone());
        let leaf = factory.builtin(Builtin::I32).unwrap();

        let err = factory.contig(4, &leaf).unwrap_err();
        assert!(matches!(err, LayoutError::CreateHook { .. }));
        // The abandoned parent released its child reference and ran its
        // own free hook.
        assert_eq!(Arc::strong_count(&leaf), 1);
        assert_eq!(hooks.freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn hooks_run_for_subarray_nest_nodes() {
        struct NameHooks {
            names: Mutex<Vec<&'static str>>,
        }
        impl TypeHooks for NameHooks {
            fn type_create(&self, node: &mut TypeNode) -> Result<(), String> {
                self.names.lock().unwrap().push(node.kind().name());
                Ok(())
            }
            fn type_free(&self, _node: &TypeNode) {}
        }

        let hooks = Arc::new(NameHooks {
            names: Mutex::new(Vec::new()),
        });
        let factory = TypeFactory::new(hooks.clone());
        let leaf = factory.builtin(Builtin::I32).unwrap();
        let _sub = factory
            .subarray(&[3, 3], &[2, 2], &[1, 1], Order::C, &leaf)
            .unwrap();

        let names = hooks.names.lock().unwrap();
        assert_eq!(
            *names,
            vec!["builtin", "contig", "hvector", "resized", "subarray"]
        );
    }
}

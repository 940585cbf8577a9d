//! JSON layout descriptions.
//!
//! A projection view over a type tree for humans and harnesses: kind,
//! constructor parameters, the derived metrics block, and children, node by
//! node.

use serde::Serialize;
use serde_json::{json, Value};

use strata_core::metrics::Metrics;
use strata_core::node::{TypeKind, TypeNode};
use strata_core::TypeHandle;

use crate::error::Error;
use crate::runtime::runtime;

/// A serializable view of one node of a type tree.
#[derive(Debug, Serialize)]
pub struct TypeDescription {
    pub kind: &'static str,
    pub params: Value,
    pub metrics: Metrics,
    pub children: Vec<TypeDescription>,
}

/// Describe the tree behind a handle.
pub fn describe(handle: TypeHandle) -> Result<TypeDescription, Error> {
    let rt = runtime()?;
    let node = rt.table.lookup(handle)?;
    Ok(describe_node(&node))
}

/// [`describe`], rendered as pretty JSON.
pub fn describe_json(handle: TypeHandle) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(&describe(handle)?)?)
}

fn describe_node(node: &TypeNode) -> TypeDescription {
    let (params, children) = match node.kind() {
        TypeKind::Builtin(b) => (json!({ "name": b.name() }), Vec::new()),
        TypeKind::Contig { count, child } => {
            (json!({ "count": count }), vec![describe_node(child)])
        }
        TypeKind::Hvector {
            count,
            blocklen,
            stride,
            child,
        } => (
            json!({ "count": count, "blocklen": blocklen, "stride": stride }),
            vec![describe_node(child)],
        ),
        TypeKind::Hindexed { blocks, child } => (
            json!({
                "blocklens": blocks.iter().map(|b| b.blocklen).collect::<Vec<_>>(),
                "displs": blocks.iter().map(|b| b.disp).collect::<Vec<_>>(),
            }),
            vec![describe_node(child)],
        ),
        TypeKind::BlkHindexed {
            blocklen,
            displs,
            child,
        } => (
            json!({ "blocklen": blocklen, "displs": displs }),
            vec![describe_node(child)],
        ),
        TypeKind::Struct { fields } => (
            json!({
                "blocklens": fields.iter().map(|f| f.blocklen).collect::<Vec<_>>(),
                "displs": fields.iter().map(|f| f.disp).collect::<Vec<_>>(),
            }),
            fields.iter().map(|f| describe_node(&f.child)).collect(),
        ),
        TypeKind::Resized { child } => (
            json!({ "lb": node.lb(), "extent": node.extent() }),
            vec![describe_node(child)],
        ),
        TypeKind::Subarray {
            sizes,
            subsizes,
            starts,
            order,
            nest,
        } => (
            json!({
                "sizes": sizes,
                "subsizes": subsizes,
                "starts": starts,
                "order": order,
            }),
            vec![describe_node(nest)],
        ),
    };
    TypeDescription {
        kind: node.kind().name(),
        params,
        metrics: *node.metrics(),
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::with_runtime;
    use crate::{create_contig, create_subarray};
    use strata_core::metrics::Order;

    #[test]
    fn description_matches_queries() {
        with_runtime(|| {
            let ty = create_contig(4, TypeHandle::I32).unwrap();
            let desc = describe(ty).unwrap();
            assert_eq!(desc.kind, "contig");
            assert_eq!(desc.metrics.size, crate::type_size(ty).unwrap());
            let (lb, extent) = crate::type_extent(ty).unwrap();
            assert_eq!(desc.metrics.lb, lb);
            assert_eq!(desc.metrics.extent, extent);
            assert_eq!(desc.children.len(), 1);
            assert_eq!(desc.children[0].kind, "builtin");
            crate::type_free(ty).unwrap();
        });
    }

    #[test]
    fn subarray_description_shows_the_nest() {
        with_runtime(|| {
            let ty = create_subarray(&[3, 3], &[2, 2], &[1, 1], Order::C, TypeHandle::I32)
                .unwrap();
            let text = describe_json(ty).unwrap();
            assert!(text.contains("\"subarray\""));
            assert!(text.contains("\"resized\""));
            assert!(text.contains("\"hvector\""));
            crate::type_free(ty).unwrap();
        });
    }
}

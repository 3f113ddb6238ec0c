//! Multi-shape composition over one joined result set.
//!
//! The columns of a joined row are split left to right between the shapes,
//! each span gets its own row mapper, and a link function combines the
//! per-shape instances into one result. Without an explicit link function
//! the shapes are wired together by their declared reference fields.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::compiler::{downcast, span_is_null, RowMapper};
use crate::cursor::{ColumnSchema, RowCursor};
use crate::error::{RowmapError, RowmapResult};
use crate::shape::{Instance, LinkDescriptor, Shape, ShapeType};

/// Column spans and row mappers for an ordered list of shapes.
pub struct CompositionPlan {
    pub shapes: Vec<ShapeType>,
    mappers: Vec<Arc<RowMapper>>,
}

impl CompositionPlan {
    /// `(first column, column count)` per shape.
    pub fn spans(&self) -> Vec<(usize, usize)> {
        self.mappers.iter().map(|m| m.span()).collect()
    }

    /// Map the current row into one instance per shape. A shape whose
    /// columns are all NULL yields `None`.
    pub fn map_row(
        &self,
        cursor: &dyn RowCursor,
        row: usize,
    ) -> RowmapResult<Vec<Option<Instance>>> {
        self.mappers
            .iter()
            .map(|mapper| {
                let (first, count) = mapper.span();
                if count > 0 && span_is_null(cursor, first, count) {
                    Ok(None)
                } else {
                    mapper.map_row(cursor, row).map(Some)
                }
            })
            .collect()
    }
}

struct LinkStep {
    child: usize,
    parent: usize,
    link: LinkDescriptor,
}

/// An inferred link function: each later shape is moved into the single
/// reference field an earlier shape declares for it.
pub struct AutoLink {
    steps: Vec<LinkStep>,
}

impl AutoLink {
    fn infer(catalog: &Catalog, shapes: &[ShapeType]) -> RowmapResult<Self> {
        let metadata = shapes
            .iter()
            .map(|s| catalog.metadata_for(*s))
            .collect::<RowmapResult<Vec<_>>>()?;

        let mut steps = Vec::new();
        for (child, shape) in shapes.iter().enumerate().skip(1) {
            let target = shape.id;
            let candidates: Vec<(usize, &LinkDescriptor)> = (0..child)
                .rev()
                .flat_map(|parent| {
                    metadata[parent]
                        .links()
                        .iter()
                        .filter(move |link| link.target == target)
                        .map(move |link| (parent, link))
                })
                .collect();

            match candidates.as_slice() {
                [] => {
                    return Err(RowmapError::composition(format!(
                        "Can't auto join {}: no earlier shape has a field of that type",
                        shape.name
                    )));
                }
                [(parent, link)] => steps.push(LinkStep {
                    child,
                    parent: *parent,
                    link: (*link).clone(),
                }),
                _ => {
                    let owners: Vec<String> = candidates
                        .iter()
                        .map(|(p, l)| format!("{}.{}", shapes[*p].name, l.name))
                        .collect();
                    return Err(RowmapError::composition(format!(
                        "Can't auto join {}: more than one candidate field ({})",
                        shape.name,
                        owners.join(", ")
                    )));
                }
            }
        }
        Ok(Self { steps })
    }

    /// Wire the instances together and return the first one.
    pub fn apply(&self, mut instances: Vec<Option<Instance>>) -> RowmapResult<Option<Instance>> {
        if instances.first().is_none_or(Option::is_none) {
            return Ok(None);
        }
        for step in self.steps.iter().rev() {
            let Some(child) = instances[step.child].take() else {
                continue;
            };
            if let Some(parent) = instances[step.parent].as_mut() {
                step.link
                    .assign(parent.as_mut(), child)
                    .map_err(|e| RowmapError::composition(e.to_string()))?;
            }
        }
        Ok(instances[0].take())
    }
}

/// Find where the span of `this` ends, starting at `pos`.
fn find_split_point(
    catalog: &Catalog,
    this: ShapeType,
    next: ShapeType,
    schema: &[ColumnSchema],
    pos: usize,
) -> RowmapResult<usize> {
    let this_meta = catalog.metadata_for(this)?;
    let next_meta = catalog.metadata_for(next)?;

    let mut used = HashSet::new();
    for (index, col) in schema.iter().enumerate().skip(pos) {
        let name = col.name.as_str();
        if used.contains(name) || (!this_meta.has_column(name) && next_meta.has_column(name)) {
            return Ok(index);
        }
        used.insert(name);
    }
    Err(RowmapError::composition(format!(
        "Couldn't find split point between {} and {}",
        this.name, next.name
    )))
}

impl Catalog {
    /// Get or build the composition plan for `shapes` over `schema`.
    pub fn composition(
        &self,
        result: TypeId,
        shapes: &[ShapeType],
        source: &str,
        sql: &str,
        schema: &[ColumnSchema],
    ) -> RowmapResult<Arc<CompositionPlan>> {
        let key = (
            result,
            shapes.iter().map(|s| s.id).collect(),
            source.to_string(),
            sql.to_string(),
        );
        self.compositions.get_or_try_insert_with(key, || {
            let mut mappers = Vec::with_capacity(shapes.len());
            let mut pos = 0;
            for (i, shape) in shapes.iter().enumerate() {
                let end = match shapes.get(i + 1) {
                    Some(next) => find_split_point(self, *shape, *next, schema, pos)?,
                    None => schema.len().max(pos),
                };
                if end == pos {
                    warn!(shape = shape.name, "shape has no columns in the composed result");
                }
                mappers.push(self.row_mapper(*shape, source, sql, pos, end - pos, schema)?);
                pos = end;
            }
            debug!(shapes = shapes.len(), "built composition plan");
            Ok(Arc::new(CompositionPlan {
                shapes: shapes.to_vec(),
                mappers,
            }))
        })
    }

    /// Get or infer the auto-link for `shapes`.
    pub fn auto_link(&self, shapes: &[ShapeType]) -> RowmapResult<Arc<AutoLink>> {
        let key = shapes.iter().map(|s| s.id).collect();
        self.auto_links
            .get_or_try_insert_with(key, || AutoLink::infer(self, shapes).map(Arc::new))
    }

    /// Compose every remaining row, feeding the per-shape instances to
    /// `link`. A `None` from `link` marks the end of a group; if any row
    /// did that, `link` is called once more with all `None` after the last
    /// row to emit the final group.
    pub fn compose_rows<R: 'static>(
        &self,
        shapes: &[ShapeType],
        source: &str,
        sql: &str,
        cursor: &mut dyn RowCursor,
        mut link: impl FnMut(Vec<Option<Instance>>) -> RowmapResult<Option<R>>,
    ) -> RowmapResult<Vec<R>> {
        let schema = cursor.schema();
        let plan = self.composition(TypeId::of::<R>(), shapes, source, sql, &schema)?;

        let mut results = Vec::new();
        let mut need_terminator = false;
        let mut row = 0;
        while cursor.advance() {
            row += 1;
            match link(plan.map_row(cursor, row)?)? {
                Some(result) => results.push(result),
                None => need_terminator = true,
            }
        }

        if need_terminator {
            if let Some(result) = link(shapes.iter().map(|_| None).collect())? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Compose with auto-link, returning the first shape of each row.
    pub fn compose_auto<S: ShapeSet>(
        &self,
        source: &str,
        sql: &str,
        cursor: &mut dyn RowCursor,
    ) -> RowmapResult<Vec<S::First>> {
        let shapes = S::shapes();
        let auto = self.auto_link(&shapes)?;
        self.compose_rows(&shapes, source, sql, cursor, |instances| {
            auto.apply(instances)?
                .map(downcast::<S::First>)
                .transpose()
        })
    }

    /// Compose with an explicit link function.
    pub fn compose_with<S, R, F>(
        &self,
        source: &str,
        sql: &str,
        cursor: &mut dyn RowCursor,
        mut link: F,
    ) -> RowmapResult<Vec<R>>
    where
        S: ShapeSet,
        R: 'static,
        F: FnMut(S::Values) -> Option<R>,
    {
        let shapes = S::shapes();
        self.compose_rows(&shapes, source, sql, cursor, |instances| {
            Ok(link(S::unpack(instances)?))
        })
    }
}

/// A fixed list of shapes read from one row, implemented for tuples.
pub trait ShapeSet {
    type First: Shape;
    /// One `Option` per shape, `None` when its columns were all NULL.
    type Values;

    fn shapes() -> Vec<ShapeType>;

    fn unpack(instances: Vec<Option<Instance>>) -> RowmapResult<Self::Values>;
}

fn take_next<T: Shape>(
    instances: &mut impl Iterator<Item = Option<Instance>>,
) -> RowmapResult<Option<T>> {
    instances.next().flatten().map(downcast::<T>).transpose()
}

macro_rules! impl_shape_set {
    ($first:ident $(, $rest:ident)*) => {
        impl<$first: Shape $(, $rest: Shape)*> ShapeSet for ($first, $($rest,)*) {
            type First = $first;
            type Values = (Option<$first>, $(Option<$rest>,)*);

            fn shapes() -> Vec<ShapeType> {
                vec![ShapeType::of::<$first>() $(, ShapeType::of::<$rest>())*]
            }

            fn unpack(instances: Vec<Option<Instance>>) -> RowmapResult<Self::Values> {
                let mut iter = instances.into_iter();
                Ok((take_next::<$first>(&mut iter)?, $(take_next::<$rest>(&mut iter)?,)*))
            }
        }
    };
}

impl_shape_set!(A, B);
impl_shape_set!(A, B, C);
impl_shape_set!(A, B, C, D);

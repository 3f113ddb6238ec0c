//! The catalog: mapper registry plus every derived cache.

use std::any::TypeId;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::cache::Cache;
use crate::compiler::RowMapper;
use crate::compose::{AutoLink, CompositionPlan};
use crate::error::{RowmapError, RowmapResult};
use crate::mapper::{Mapper, StandardMapper};
use crate::metadata::ShapeMetadata;
use crate::shape::{Shape, ShapeDescriptor, ShapeType};

/// Where a registered mapper applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapperScope {
    /// A single shape type.
    Shape(TypeId),
    /// Every shape whose type path starts with this crate name.
    Crate(String),
}

impl MapperScope {
    fn matches(&self, shape: &ShapeDescriptor) -> bool {
        match self {
            MapperScope::Shape(id) => *id == shape.type_id,
            MapperScope::Crate(name) => shape
                .type_name
                .strip_prefix(name.as_str())
                .is_some_and(|rest| rest.starts_with("::")),
        }
    }
}

pub(crate) type RowMapperKey = (TypeId, String, String, usize, usize);
pub(crate) type CompositionKey = (TypeId, Vec<TypeId>, String, String);

/// Owns mapper bindings and the caches built from them.
///
/// Share one catalog across databases with `Arc<Catalog>`. Any change to
/// the mapper bindings flushes every cache.
pub struct Catalog {
    mappers: RwLock<Vec<(MapperScope, Arc<dyn Mapper>)>>,
    standard: Arc<dyn Mapper>,
    pub(crate) metadata: Cache<TypeId, Arc<ShapeMetadata>>,
    pub(crate) row_mappers: Cache<RowMapperKey, Arc<RowMapper>>,
    pub(crate) compositions: Cache<CompositionKey, Arc<CompositionPlan>>,
    pub(crate) auto_links: Cache<Vec<TypeId>, Arc<AutoLink>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            mappers: RwLock::new(Vec::new()),
            standard: Arc::new(StandardMapper),
            metadata: Cache::new(),
            row_mappers: Cache::new(),
            compositions: Cache::new(),
            auto_links: Cache::new(),
        }
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `mapper` for shape `T`.
    pub fn register_shape<T: Shape>(&self, mapper: Arc<dyn Mapper>) -> RowmapResult<()> {
        self.register(MapperScope::Shape(TypeId::of::<T>()), mapper)
    }

    /// Use `mapper` for every shape declared in `crate_name`.
    pub fn register_crate(&self, crate_name: &str, mapper: Arc<dyn Mapper>) -> RowmapResult<()> {
        self.register(MapperScope::Crate(crate_name.to_string()), mapper)
    }

    pub fn register(&self, scope: MapperScope, mapper: Arc<dyn Mapper>) -> RowmapResult<()> {
        {
            let mut mappers = self.mappers.write().unwrap_or_else(PoisonError::into_inner);
            if mappers.iter().any(|(s, _)| *s == scope) {
                return Err(RowmapError::configuration(format!(
                    "A mapper is already registered for {:?}",
                    scope
                )));
            }
            mappers.push((scope, mapper));
        }
        self.flush_caches();
        Ok(())
    }

    pub fn revoke_shape<T: Shape>(&self) {
        self.revoke_where(|scope, _| *scope == MapperScope::Shape(TypeId::of::<T>()));
    }

    pub fn revoke_crate(&self, crate_name: &str) {
        self.revoke_where(|scope, _| matches!(scope, MapperScope::Crate(n) if n == crate_name));
    }

    /// Remove every binding of this mapper instance.
    pub fn revoke_mapper(&self, mapper: &Arc<dyn Mapper>) {
        self.revoke_where(|_, m| Arc::ptr_eq(m, mapper));
    }

    fn revoke_where(&self, pred: impl Fn(&MapperScope, &Arc<dyn Mapper>) -> bool) {
        {
            let mut mappers = self.mappers.write().unwrap_or_else(PoisonError::into_inner);
            mappers.retain(|(scope, mapper)| !pred(scope, mapper));
        }
        self.flush_caches();
    }

    /// Discard all metadata, row mappers, compositions, and auto-links.
    pub fn flush_caches(&self) {
        self.metadata.flush();
        self.row_mappers.flush();
        self.compositions.flush();
        self.auto_links.flush();
        debug!("rowmap caches flushed");
    }

    /// Mapper for a shape: shape scope first, then crate scope, then standard.
    pub fn mapper_for(&self, shape: &ShapeDescriptor) -> Arc<dyn Mapper> {
        let mappers = self.mappers.read().unwrap_or_else(PoisonError::into_inner);
        let by_shape = mappers
            .iter()
            .find(|(scope, _)| matches!(scope, MapperScope::Shape(_)) && scope.matches(shape));
        let by_crate = || {
            mappers
                .iter()
                .find(|(scope, _)| matches!(scope, MapperScope::Crate(_)) && scope.matches(shape))
        };
        by_shape
            .or_else(by_crate)
            .map(|(_, mapper)| Arc::clone(mapper))
            .unwrap_or_else(|| Arc::clone(&self.standard))
    }

    pub fn metadata<T: Shape>(&self) -> RowmapResult<Arc<ShapeMetadata>> {
        self.metadata_for(ShapeType::of::<T>())
    }

    pub fn metadata_for(&self, shape: ShapeType) -> RowmapResult<Arc<ShapeMetadata>> {
        self.metadata.get_or_try_insert_with(shape.id, || {
            let descriptor = shape.describe();
            let mapper = self.mapper_for(&descriptor);
            let meta = ShapeMetadata::build(shape, mapper)?;
            debug!(shape = shape.name, table = meta.table_name(), "built shape metadata");
            Ok(Arc::new(meta))
        })
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("metadata", &self.metadata.len())
            .field("row_mappers", &self.row_mappers.len())
            .field("compositions", &self.compositions.len())
            .field("auto_links", &self.auto_links.len())
            .finish()
    }
}

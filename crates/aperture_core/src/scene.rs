//! # Scene
//!
//! The per-frame component snapshot the renderer reads.
//!
//! [`ComponentProvider`] is the read-only contract: dense arrays per kind,
//! the entity owning each slot, and entity -> slot lookups for the
//! references between components (renderable -> geometry, part -> material).
//! [`Scene`] is the stock implementation on top of [`ComponentStore`].

use crate::ecs::{
    ComponentKind, ComponentStore, Entity, EntityAllocator, GeometryComponent, LightComponent,
    MaterialComponent, RenderableComponent,
};

/// Read-only per-frame arrays of scene components.
///
/// Slices of one kind share their indexing: `renderables()[i]` belongs to
/// `renderable_entities()[i]`.
pub trait ComponentProvider: Sync {
    /// Renderable instances.
    fn renderables(&self) -> &[RenderableComponent];
    /// Owners of [`ComponentProvider::renderables`].
    fn renderable_entities(&self) -> &[Entity];
    /// Lights.
    fn lights(&self) -> &[LightComponent];
    /// Owners of [`ComponentProvider::lights`].
    fn light_entities(&self) -> &[Entity];
    /// Materials.
    fn materials(&self) -> &[MaterialComponent];
    /// Owners of [`ComponentProvider::materials`].
    fn material_entities(&self) -> &[Entity];
    /// Geometries.
    fn geometries(&self) -> &[GeometryComponent];
    /// Owners of [`ComponentProvider::geometries`].
    fn geometry_entities(&self) -> &[Entity];
    /// Slot of `entity` in the array of `kind`.
    fn index_of(&self, kind: ComponentKind, entity: Entity) -> Option<usize>;

    /// Number of components of `kind`.
    fn count(&self, kind: ComponentKind) -> usize {
        match kind {
            ComponentKind::Renderable => self.renderables().len(),
            ComponentKind::Light => self.lights().len(),
            ComponentKind::Material => self.materials().len(),
            ComponentKind::Geometry => self.geometries().len(),
        }
    }
}

/// Scene made of one [`ComponentStore`] per component kind.
#[derive(Default)]
pub struct Scene {
    entities: EntityAllocator,
    /// Renderable instances.
    pub renderables: ComponentStore<RenderableComponent>,
    /// Lights.
    pub lights: ComponentStore<LightComponent>,
    /// Materials.
    pub materials: ComponentStore<MaterialComponent>,
    /// Geometries.
    pub geometries: ComponentStore<GeometryComponent>,
}

impl Scene {
    /// Creates an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new entity with no components.
    pub fn create_entity(&mut self) -> Entity {
        self.entities.create()
    }

    /// Destroys an entity and removes every component it owns.
    ///
    /// The renderer sees the removal at its next scan.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        self.renderables.remove(entity);
        self.lights.remove(entity);
        self.materials.remove(entity);
        self.geometries.remove(entity);
        self.entities.destroy(entity)
    }

    /// Number of live entities.
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Creates a material entity.
    pub fn add_material(&mut self, material: MaterialComponent) -> Entity {
        let entity = self.create_entity();
        self.materials.insert(entity, material);
        entity
    }

    /// Creates a geometry entity.
    pub fn add_geometry(&mut self, geometry: GeometryComponent) -> Entity {
        let entity = self.create_entity();
        self.geometries.insert(entity, geometry);
        entity
    }

    /// Creates a renderable entity.
    pub fn add_renderable(&mut self, renderable: RenderableComponent) -> Entity {
        let entity = self.create_entity();
        self.renderables.insert(entity, renderable);
        entity
    }

    /// Creates a light entity.
    pub fn add_light(&mut self, light: LightComponent) -> Entity {
        let entity = self.create_entity();
        self.lights.insert(entity, light);
        entity
    }
}

impl ComponentProvider for Scene {
    fn renderables(&self) -> &[RenderableComponent] {
        self.renderables.as_slice()
    }

    fn renderable_entities(&self) -> &[Entity] {
        self.renderables.entities()
    }

    fn lights(&self) -> &[LightComponent] {
        self.lights.as_slice()
    }

    fn light_entities(&self) -> &[Entity] {
        self.lights.entities()
    }

    fn materials(&self) -> &[MaterialComponent] {
        self.materials.as_slice()
    }

    fn material_entities(&self) -> &[Entity] {
        self.materials.entities()
    }

    fn geometries(&self) -> &[GeometryComponent] {
        self.geometries.as_slice()
    }

    fn geometry_entities(&self) -> &[Entity] {
        self.geometries.entities()
    }

    fn index_of(&self, kind: ComponentKind, entity: Entity) -> Option<usize> {
        match kind {
            ComponentKind::Renderable => self.renderables.index_of(entity),
            ComponentKind::Light => self.lights.index_of(entity),
            ComponentKind::Material => self.materials.index_of(entity),
            ComponentKind::Geometry => self.geometries.index_of(entity),
        }
    }
}

//! # Component Storage
//!
//! Dense component storage with an incrementally maintained entity/slot map.
//!
//! The storage uses a dense array strategy:
//! - Components, and the entity owning each one, sit in parallel arrays
//! - Removal swaps the last element into the hole, keeping arrays dense
//! - The entity -> slot map is updated on every insert and remove, so
//!   lookups never scan the arrays

use std::collections::HashMap;

use super::component::Component;
use super::entity::Entity;

/// Dense storage for a single component type.
///
/// This storage guarantees:
/// - O(1) lookup in both directions (entity -> slot, slot -> entity)
/// - Cache-friendly iteration over contiguous slices
/// - Slot order changes only on removal (swap-remove)
///
/// # Example
///
/// ```rust,ignore
/// let mut store: ComponentStore<MaterialComponent> = ComponentStore::new();
/// store.insert(entity, MaterialComponent::default());
/// assert_eq!(store.index_of(entity), Some(0));
/// ```
pub struct ComponentStore<C: Component> {
    /// The dense array of components.
    components: Vec<C>,
    /// Owning entity of each slot.
    entities: Vec<Entity>,
    /// Entity -> slot.
    lookup: HashMap<Entity, usize>,
}

impl<C: Component> Default for ComponentStore<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Component> ComponentStore<C> {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates empty storage with room for `capacity` components.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            components: Vec::with_capacity(capacity),
            entities: Vec::with_capacity(capacity),
            lookup: HashMap::with_capacity(capacity),
        }
    }

    /// Number of stored components.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns true if nothing is stored.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Inserts or replaces the component of `entity`.
    ///
    /// Returns the slot the component lives in.
    ///
    /// # Panics
    ///
    /// Panics if `entity` is null.
    pub fn insert(&mut self, entity: Entity, component: C) -> usize {
        assert!(!entity.is_null(), "cannot attach a component to the null entity");

        if let Some(&index) = self.lookup.get(&entity) {
            self.components[index] = component;
            return index;
        }

        let index = self.components.len();
        self.components.push(component);
        self.entities.push(entity);
        self.lookup.insert(entity, index);
        index
    }

    /// Removes the component of `entity`.
    ///
    /// The last slot is moved into the freed slot and its map entry updated.
    pub fn remove(&mut self, entity: Entity) -> Option<C> {
        let index = self.lookup.remove(&entity)?;
        let component = self.components.swap_remove(index);
        self.entities.swap_remove(index);

        if let Some(&moved) = self.entities.get(index) {
            self.lookup.insert(moved, index);
        }

        Some(component)
    }

    /// Returns true if `entity` has a component here.
    #[inline]
    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.lookup.contains_key(&entity)
    }

    /// Slot of `entity`.
    #[inline]
    #[must_use]
    pub fn index_of(&self, entity: Entity) -> Option<usize> {
        self.lookup.get(&entity).copied()
    }

    /// Entity owning `index`.
    #[inline]
    #[must_use]
    pub fn entity_at(&self, index: usize) -> Option<Entity> {
        self.entities.get(index).copied()
    }

    /// Component of `entity`.
    #[inline]
    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&C> {
        self.index_of(entity).map(|index| &self.components[index])
    }

    /// Mutable component of `entity`.
    #[inline]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut C> {
        let index = self.index_of(entity)?;
        Some(&mut self.components[index])
    }

    /// All components, in slot order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[C] {
        &self.components
    }

    /// All components, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [C] {
        &mut self.components
    }

    /// Owning entities, in slot order.
    #[inline]
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Iterates `(entity, component)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &C)> {
        self.entities.iter().copied().zip(self.components.iter())
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.components.clear();
        self.entities.clear();
        self.lookup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::MaterialComponent;

    fn material(roughness: f32) -> MaterialComponent {
        MaterialComponent {
            roughness,
            ..MaterialComponent::default()
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store: ComponentStore<MaterialComponent> = ComponentStore::new();
        let a = Entity::new(7, 0);
        let b = Entity::new(3, 1);

        assert_eq!(store.insert(a, material(0.1)), 0);
        assert_eq!(store.insert(b, material(0.2)), 1);
        assert_eq!(store.index_of(b), Some(1));
        assert_eq!(store.entity_at(0), Some(a));
        assert_eq!(store.len(), 2);

        // Replacing keeps the slot.
        assert_eq!(store.insert(a, material(0.9)), 0);
        assert!((store.get(a).unwrap().roughness - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_swap_remove_keeps_map_consistent() {
        let mut store: ComponentStore<MaterialComponent> = ComponentStore::new();
        let entities: Vec<Entity> = (0..5).map(|i| Entity::new(i, 0)).collect();
        for (i, &entity) in entities.iter().enumerate() {
            store.insert(entity, material(i as f32));
        }

        let removed = store.remove(entities[1]).unwrap();
        assert!((removed.roughness - 1.0).abs() < f32::EPSILON);
        assert!(!store.contains(entities[1]));
        assert!(store.remove(entities[1]).is_none());

        for (index, &entity) in store.entities().iter().enumerate() {
            assert_eq!(store.index_of(entity), Some(index));
        }
        assert_eq!(store.index_of(entities[4]), Some(1));
    }

    #[test]
    fn test_remove_last() {
        let mut store: ComponentStore<MaterialComponent> = ComponentStore::new();
        let a = Entity::new(0, 0);
        store.insert(a, material(0.5));
        assert!(store.remove(a).is_some());
        assert!(store.is_empty());
    }
}

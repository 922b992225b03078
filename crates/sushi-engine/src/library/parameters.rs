//! Plugin parameters and properties
//!
//! Parameter descriptors are immutable after registration. Values live in a
//! `ParameterStore` shared between the RT-owned processor object and the
//! non-RT registries: the RT side writes plain atomics, control threads read
//! them without locks. String-valued properties sit behind a mutex that the
//! RT path only touches when consuming a (rare) property-change event.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use portable_atomic::AtomicF32;
use std::sync::atomic::{AtomicBool, Ordering};

use sushi_core::{ObjectId, ObjectIdSource};

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Bool,
    Int,
    Float,
}

/// Whether a parameter is set from the outside or produced by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Automatable,
    Output,
}

/// Maps between the normalized [0, 1] range, the domain range [min, max] and
/// the processed value the DSP actually consumes.
#[derive(Debug, Clone, Copy)]
pub enum PreProcessor {
    /// Clip to range, processed value equals the domain value.
    Linear,
    /// Domain value is in dB, processed value is linear gain.
    DbToLin,
    /// Cubic warp of the normalized position, for wide-range gain knobs.
    CubicWarp,
}

/// Immutable description of one parameter.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub unit: String,
    pub parameter_type: ParameterType,
    pub direction: Direction,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub pre_processor: PreProcessor,
}

impl ParameterDescriptor {
    /// Map a normalized [0, 1] value to the domain range. The cubic warp
    /// shapes the mapping itself, so its domain and processed values agree.
    #[inline]
    pub fn to_domain(&self, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        match self.pre_processor {
            PreProcessor::CubicWarp => {
                self.min + normalized * normalized * normalized * (self.max - self.min)
            }
            _ => self.min + normalized * (self.max - self.min),
        }
    }

    /// Map a domain value to the normalized [0, 1] range.
    #[inline]
    pub fn to_normalized(&self, domain: f32) -> f32 {
        if self.max <= self.min {
            return 0.0;
        }
        let position = ((domain - self.min) / (self.max - self.min)).clamp(0.0, 1.0);
        match self.pre_processor {
            PreProcessor::CubicWarp => position.cbrt(),
            _ => position,
        }
    }

    /// Processed value for a normalized input, including any non-linearity.
    #[inline]
    pub fn process(&self, normalized: f32) -> f32 {
        match self.pre_processor {
            PreProcessor::Linear | PreProcessor::CubicWarp => self.to_domain(normalized),
            PreProcessor::DbToLin => sushi_core::db_to_lin(self.to_domain(normalized)),
        }
    }

    /// Format a domain value the way it is shown to the outside.
    pub fn format_value(&self, domain: f32) -> String {
        match self.parameter_type {
            ParameterType::Bool => {
                if domain > 0.5 {
                    "True".to_string()
                } else {
                    "False".to_string()
                }
            }
            ParameterType::Int => format!("{}", domain.round() as i64),
            ParameterType::Float => {
                if self.unit.is_empty() {
                    format!("{:.2}", domain)
                } else {
                    format!("{:.2} {}", domain, self.unit)
                }
            }
        }
    }
}

/// Immutable description of one string-valued property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub default_value: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE STORAGE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
struct ParameterValue {
    normalized: AtomicF32,
    processed: AtomicF32,
}

/// Handle to one registered parameter: its local index in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterIndex(usize);

/// Shared parameter and property storage for one processor.
pub struct ParameterStore {
    descriptors: Vec<Arc<ParameterDescriptor>>,
    index_by_name: HashMap<String, usize>,
    index_by_id: HashMap<ObjectId, usize>,
    values: Vec<ParameterValue>,
    property_descriptors: Vec<Arc<PropertyDescriptor>>,
    property_index_by_name: HashMap<String, usize>,
    property_index_by_id: HashMap<ObjectId, usize>,
    property_values: Mutex<Vec<String>>,
    bypassed: AtomicBool,
}

impl ParameterStore {
    pub fn builder() -> ParameterStoreBuilder {
        ParameterStoreBuilder::default()
    }

    pub fn parameter_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn descriptors(&self) -> &[Arc<ParameterDescriptor>] {
        &self.descriptors
    }

    pub fn descriptor(&self, id: ObjectId) -> Option<&Arc<ParameterDescriptor>> {
        self.index_by_id.get(&id).map(|&i| &self.descriptors[i])
    }

    pub fn descriptor_from_name(&self, name: &str) -> Option<&Arc<ParameterDescriptor>> {
        self.index_by_name.get(name).map(|&i| &self.descriptors[i])
    }

    #[inline]
    pub fn index_of(&self, id: ObjectId) -> Option<ParameterIndex> {
        self.index_by_id.get(&id).map(|&i| ParameterIndex(i))
    }

    /// Descriptor for a registered index.
    #[inline]
    pub fn descriptor_at(&self, index: ParameterIndex) -> &Arc<ParameterDescriptor> {
        &self.descriptors[index.0]
    }

    /// Normalized value of a parameter.
    #[inline]
    pub fn normalized_value(&self, index: ParameterIndex) -> f32 {
        self.values[index.0].normalized.load(Ordering::Relaxed)
    }

    /// Processed value as consumed by the DSP (e.g. linear gain).
    #[inline]
    pub fn processed_value(&self, index: ParameterIndex) -> f32 {
        self.values[index.0].processed.load(Ordering::Relaxed)
    }

    /// Domain value (e.g. dB) of a parameter.
    #[inline]
    pub fn domain_value(&self, index: ParameterIndex) -> f32 {
        self.descriptors[index.0].to_domain(self.normalized_value(index))
    }

    /// Processed value read as a boolean.
    #[inline]
    pub fn bool_value(&self, index: ParameterIndex) -> bool {
        self.normalized_value(index) > 0.5
    }

    /// Set from a normalized [0, 1] value. Lock-free, callable from RT.
    #[inline]
    pub fn set_normalized(&self, index: ParameterIndex, normalized: f32) {
        let normalized = normalized.clamp(0.0, 1.0);
        let descriptor = &self.descriptors[index.0];
        self.values[index.0]
            .normalized
            .store(normalized, Ordering::Relaxed);
        self.values[index.0]
            .processed
            .store(descriptor.process(normalized), Ordering::Relaxed);
    }

    /// Set from a domain value.
    #[inline]
    pub fn set_domain(&self, index: ParameterIndex, domain: f32) {
        let normalized = self.descriptors[index.0].to_normalized(domain);
        self.set_normalized(index, normalized);
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Relaxed);
    }

    pub fn bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    // Properties

    pub fn property_descriptors(&self) -> &[Arc<PropertyDescriptor>] {
        &self.property_descriptors
    }

    pub fn property_descriptor_from_name(&self, name: &str) -> Option<&Arc<PropertyDescriptor>> {
        self.property_index_by_name
            .get(name)
            .map(|&i| &self.property_descriptors[i])
    }

    pub fn property_value(&self, id: ObjectId) -> Option<String> {
        let index = *self.property_index_by_id.get(&id)?;
        Some(self.property_values.lock()[index].clone())
    }

    /// Replace a property value, returning the previous one so the caller
    /// can dispose of it off the audio thread.
    pub fn swap_property_value(&self, id: ObjectId, mut value: String) -> Option<String> {
        let index = *self.property_index_by_id.get(&id)?;
        std::mem::swap(&mut self.property_values.lock()[index], &mut value);
        Some(value)
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("parameters", &self.descriptors.len())
            .field("properties", &self.property_descriptors.len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Registration interface used during plugin construction, before the store
/// is shared.
#[derive(Default)]
pub struct ParameterStoreBuilder {
    descriptors: Vec<Arc<ParameterDescriptor>>,
    defaults: Vec<f32>,
    property_descriptors: Vec<Arc<PropertyDescriptor>>,
}

impl ParameterStoreBuilder {
    pub fn register_float_parameter(
        &mut self,
        ids: &ObjectIdSource,
        name: &str,
        label: &str,
        unit: &str,
        default: f32,
        min: f32,
        max: f32,
        direction: Direction,
        pre_processor: PreProcessor,
    ) -> ParameterIndex {
        self.register(
            ParameterDescriptor {
                id: ids.next(),
                name: name.to_string(),
                label: label.to_string(),
                unit: unit.to_string(),
                parameter_type: ParameterType::Float,
                direction,
                min,
                max,
                default,
                pre_processor,
            },
            default,
        )
    }

    pub fn register_int_parameter(
        &mut self,
        ids: &ObjectIdSource,
        name: &str,
        label: &str,
        unit: &str,
        default: i32,
        min: i32,
        max: i32,
        direction: Direction,
    ) -> ParameterIndex {
        self.register(
            ParameterDescriptor {
                id: ids.next(),
                name: name.to_string(),
                label: label.to_string(),
                unit: unit.to_string(),
                parameter_type: ParameterType::Int,
                direction,
                min: min as f32,
                max: max as f32,
                default: default as f32,
                pre_processor: PreProcessor::Linear,
            },
            default as f32,
        )
    }

    pub fn register_bool_parameter(
        &mut self,
        ids: &ObjectIdSource,
        name: &str,
        label: &str,
        default: bool,
        direction: Direction,
    ) -> ParameterIndex {
        self.register(
            ParameterDescriptor {
                id: ids.next(),
                name: name.to_string(),
                label: label.to_string(),
                unit: String::new(),
                parameter_type: ParameterType::Bool,
                direction,
                min: 0.0,
                max: 1.0,
                default: if default { 1.0 } else { 0.0 },
                pre_processor: PreProcessor::Linear,
            },
            if default { 1.0 } else { 0.0 },
        )
    }

    pub fn register_property(
        &mut self,
        ids: &ObjectIdSource,
        name: &str,
        label: &str,
        default_value: &str,
    ) -> ObjectId {
        let id = ids.next();
        self.property_descriptors.push(Arc::new(PropertyDescriptor {
            id,
            name: name.to_string(),
            label: label.to_string(),
            default_value: default_value.to_string(),
        }));
        id
    }

    fn register(&mut self, descriptor: ParameterDescriptor, default_domain: f32) -> ParameterIndex {
        let index = self.descriptors.len();
        self.defaults.push(descriptor.to_normalized(default_domain));
        self.descriptors.push(Arc::new(descriptor));
        ParameterIndex(index)
    }

    pub fn build(self) -> Arc<ParameterStore> {
        let index_by_name = self
            .descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        let index_by_id = self
            .descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id, i))
            .collect();
        let values = self
            .descriptors
            .iter()
            .zip(&self.defaults)
            .map(|(d, &normalized)| ParameterValue {
                normalized: AtomicF32::new(normalized),
                processed: AtomicF32::new(d.process(normalized)),
            })
            .collect();
        let property_index_by_name = self
            .property_descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        let property_index_by_id = self
            .property_descriptors
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id, i))
            .collect();
        let property_values = self
            .property_descriptors
            .iter()
            .map(|d| d.default_value.clone())
            .collect();

        Arc::new(ParameterStore {
            descriptors: self.descriptors,
            index_by_name,
            index_by_id,
            values,
            property_descriptors: self.property_descriptors,
            property_index_by_name,
            property_index_by_id,
            property_values: Mutex::new(property_values),
            bypassed: AtomicBool::new(false),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gain_store() -> (Arc<ParameterStore>, ParameterIndex) {
        let ids = ObjectIdSource::new();
        let mut builder = ParameterStore::builder();
        let gain = builder.register_float_parameter(
            &ids,
            "gain",
            "Gain",
            "dB",
            0.0,
            -120.0,
            24.0,
            Direction::Automatable,
            PreProcessor::DbToLin,
        );
        (builder.build(), gain)
    }

    #[test]
    fn test_default_values() {
        let (store, gain) = gain_store();
        // Default of 0 dB maps to linear gain 1.0
        assert_relative_eq!(store.domain_value(gain), 0.0, epsilon = 1e-4);
        assert_relative_eq!(store.processed_value(gain), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_normalized_domain_roundtrip() {
        let (store, gain) = gain_store();
        store.set_domain(gain, 6.0);
        let normalized = store.normalized_value(gain);
        assert_relative_eq!(normalized, 126.0 / 144.0, epsilon = 1e-5);
        assert_relative_eq!(store.domain_value(gain), 6.0, epsilon = 1e-3);
        assert_relative_eq!(store.processed_value(gain), 1.9952623, epsilon = 1e-4);
    }

    #[test]
    fn test_values_are_clamped() {
        let (store, gain) = gain_store();
        store.set_normalized(gain, 1.5);
        assert_relative_eq!(store.normalized_value(gain), 1.0);
        assert_relative_eq!(store.domain_value(gain), 24.0);
    }

    #[test]
    fn test_cubic_warp() {
        let ids = ObjectIdSource::new();
        let mut builder = ParameterStore::builder();
        let warped = builder.register_float_parameter(
            &ids,
            "gain",
            "Gain",
            "",
            0.1,
            0.1,
            10.0,
            Direction::Automatable,
            PreProcessor::CubicWarp,
        );
        let store = builder.build();
        store.set_normalized(warped, 0.5);
        assert_relative_eq!(store.processed_value(warped), 0.1 + 0.125 * 9.9, epsilon = 1e-4);
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let (store, _) = gain_store();
        let descriptor = store.descriptor_from_name("gain").unwrap().clone();
        assert!(store.descriptor(descriptor.id).is_some());
        assert!(store.descriptor_from_name("missing").is_none());
    }

    #[test]
    fn test_property_swap() {
        let ids = ObjectIdSource::new();
        let mut builder = ParameterStore::builder();
        let prop_id = builder.register_property(&ids, "destination_file", "Destination file", "");
        let store = builder.build();

        let old = store.swap_property_value(prop_id, "/tmp/out.wav".to_string());
        assert_eq!(old.as_deref(), Some(""));
        assert_eq!(store.property_value(prop_id).as_deref(), Some("/tmp/out.wav"));
    }

    #[test]
    fn test_format_value() {
        let (store, gain) = gain_store();
        let descriptor = store.descriptor_from_name("gain").unwrap();
        assert_eq!(descriptor.format_value(store.domain_value(gain)), "0.00 dB");
    }
}

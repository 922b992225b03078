//! Rate-limited parameter change notifications
//!
//! Collects parameter-change markings from the RT domain and turns them into
//! outbound notification events, coalescing bursts: a parameter is notified
//! at most once per update interval and only when its value actually
//! changed. Entries throttled this round are kept at the front of the queue
//! and retried on the next pass.

use std::collections::HashMap;

use sushi_core::{ObjectId, Time};

use crate::engine::processor_container::ProcessorContainer;
use crate::library::event::{Event, EventBody, EventPoster};

struct ParameterEntry {
    value: f32,
    last_update: Time,
}

#[derive(Clone, Copy)]
struct ParameterUpdate {
    processor_id: ObjectId,
    parameter_id: ObjectId,
    update_time: Time,
}

#[derive(Clone, Copy)]
struct ProcessorUpdate {
    processor_id: ObjectId,
    update_time: Time,
}

pub struct ParameterManager {
    update_rate: Time,
    parameters: HashMap<ObjectId, HashMap<ObjectId, ParameterEntry>>,
    parameter_change_queue: Vec<ParameterUpdate>,
    processor_change_queue: Vec<ProcessorUpdate>,
}

impl ParameterManager {
    pub fn new(update_rate: Time) -> Self {
        Self {
            update_rate,
            parameters: HashMap::new(),
            parameter_change_queue: Vec::new(),
            processor_change_queue: Vec::new(),
        }
    }

    /// Start tracking all parameters of a processor.
    pub fn track_parameters(&mut self, container: &ProcessorContainer, processor_id: ObjectId) {
        if let Some(info) = container.processor(processor_id) {
            let entries = self.parameters.entry(processor_id).or_default();
            for descriptor in info.parameters.descriptors() {
                let index = info
                    .parameters
                    .index_of(descriptor.id)
                    .expect("descriptor is in its own store");
                entries.insert(
                    descriptor.id,
                    ParameterEntry {
                        value: info.parameters.normalized_value(index),
                        last_update: Time::ZERO,
                    },
                );
            }
        }
    }

    pub fn untrack_parameters(&mut self, processor_id: ObjectId) {
        self.parameters.remove(&processor_id);
    }

    pub fn mark_parameter_changed(
        &mut self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
        timestamp: Time,
    ) {
        self.parameter_change_queue.push(ParameterUpdate {
            processor_id,
            parameter_id,
            update_time: timestamp,
        });
    }

    /// Queue a "notify every parameter" pass for one processor.
    pub fn mark_processor_changed(&mut self, processor_id: ObjectId, timestamp: Time) {
        match self
            .processor_change_queue
            .iter_mut()
            .find(|update| update.processor_id == processor_id)
        {
            Some(update) => update.update_time = timestamp,
            None => self.processor_change_queue.push(ProcessorUpdate {
                processor_id,
                update_time: timestamp,
            }),
        }
    }

    pub fn output_parameter_notifications(
        &mut self,
        poster: &dyn EventPoster,
        container: &ProcessorContainer,
        target_time: Time,
    ) {
        self.output_processor_notifications(poster, container, target_time);
        self.output_single_parameter_notifications(poster, container, target_time);
    }

    fn output_single_parameter_notifications(
        &mut self,
        poster: &dyn EventPoster,
        container: &ProcessorContainer,
        timestamp: Time,
    ) {
        let update_rate = self.update_rate;
        let mut kept = 0;
        for i in 0..self.parameter_change_queue.len() {
            let ParameterUpdate {
                processor_id,
                parameter_id,
                update_time,
            } = self.parameter_change_queue[i];
            let Some(entries) = self.parameters.get_mut(&processor_id) else {
                continue;
            };
            let Some(entry) = entries.get_mut(&parameter_id) else {
                continue;
            };

            // Send when the update time has passed and the last notification
            // is older than one update interval
            if update_time <= timestamp && entry.last_update + update_rate <= timestamp {
                if let Some(info) = container.processor(processor_id) {
                    if let Some(index) = info.parameters.index_of(parameter_id) {
                        let value = info.parameters.normalized_value(index);
                        if value != entry.value {
                            send_parameter_notification(
                                poster,
                                &info.parameters,
                                processor_id,
                                parameter_id,
                                value,
                                timestamp,
                            );
                            entry.last_update = timestamp;
                            entry.value = value;
                        }
                    }
                }
            } else if entry.last_update != timestamp {
                // Not a duplicate of something sent this round, only updated
                // too recently: keep it at the front and retry next pass
                self.parameter_change_queue.swap(i, kept);
                kept += 1;
            }
        }
        self.parameter_change_queue.truncate(kept);
    }

    fn output_processor_notifications(
        &mut self,
        poster: &dyn EventPoster,
        container: &ProcessorContainer,
        timestamp: Time,
    ) {
        let mut kept = 0;
        for i in 0..self.processor_change_queue.len() {
            let ProcessorUpdate {
                processor_id,
                update_time,
            } = self.processor_change_queue[i];
            // Processor-level notifications ignore the per-parameter
            // throttling and always send
            if update_time <= timestamp {
                if let Some(info) = container.processor(processor_id) {
                    let entries = self.parameters.entry(processor_id).or_default();
                    for descriptor in info.parameters.descriptors() {
                        let Some(entry) = entries.get_mut(&descriptor.id) else {
                            continue;
                        };
                        let index = info
                            .parameters
                            .index_of(descriptor.id)
                            .expect("descriptor is in its own store");
                        let value = info.parameters.normalized_value(index);
                        if value != entry.value {
                            send_parameter_notification(
                                poster,
                                &info.parameters,
                                processor_id,
                                descriptor.id,
                                value,
                                timestamp,
                            );
                            entry.value = value;
                            entry.last_update = timestamp;
                        }
                    }
                }
            } else {
                self.processor_change_queue.swap(i, kept);
                kept += 1;
            }
        }
        self.processor_change_queue.truncate(kept);
    }
}

fn send_parameter_notification(
    poster: &dyn EventPoster,
    store: &crate::library::parameters::ParameterStore,
    processor_id: ObjectId,
    parameter_id: ObjectId,
    normalized_value: f32,
    timestamp: Time,
) {
    let Some(descriptor) = store.descriptor(parameter_id) else {
        return;
    };
    let domain_value = descriptor.to_domain(normalized_value);
    poster.post(Event::new(
        EventBody::ParameterChangeNotification {
            processor_id,
            parameter_id,
            normalized_value,
            domain_value,
            formatted_value: descriptor.format_value(domain_value),
        },
        timestamp,
    ));
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

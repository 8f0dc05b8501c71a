use crossbeam_channel::{bounded, unbounded, Receiver};
use rustc_hash::{FxHashMap, FxHasher};

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::record::BioRecord;
use crate::stream::*;

/// How [`BatchStream::distribute`] picks the output of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classifier {
    /// Value of an annotation, `default` when it is missing.
    Annotation { key: String, default: String },
    /// Records dealt round-robin over `n` outputs.
    Rotate(usize),
    /// Hash of the sequence, modulo `n`.
    Hash(usize),
}

impl Classifier {
    pub fn annotation(key: impl Into<String>, default: impl Into<String>) -> Self {
        Classifier::Annotation {
            key: key.into(),
            default: default.into(),
        }
    }

    fn classify(&self, record: &BioRecord, counter: &mut usize) -> String {
        match self {
            Classifier::Annotation { key, default } => record
                .annotations()
                .get(key)
                .map_or_else(|| default.clone(), |v| v.to_string()),
            Classifier::Rotate(n) => {
                let key = *counter % (*n).max(1);
                *counter += 1;
                key.to_string()
            }
            Classifier::Hash(n) => {
                let mut h = FxHasher::default();
                record.sequence().hash(&mut h);
                (h.finish() % (*n).max(1) as u64).to_string()
            }
        }
    }
}

/// The output streams of a [`BatchStream::distribute`], announced as their
/// first record is classified.
///
/// Every announced stream must be drained, concurrently with the others.
pub struct Distribution {
    outputs: Receiver<(String, BatchStream)>,
}

impl Iterator for Distribution {
    type Item = (String, BatchStream);

    fn next(&mut self) -> Option<Self::Item> {
        self.outputs.recv().ok()
    }
}

impl BatchStream {
    /// Route each record (with its mate) to one output stream per key.
    ///
    /// Records of one key keep their order.
    pub fn distribute(self, classifier: Classifier, batch_size: usize) -> Distribution {
        let (rx, paired, mut stages, config) = self.into_parts();
        let (tx_outputs, outputs) = unbounded();

        let stage = Stage::new("Distribute");
        stages.push(Arc::clone(&stage));

        stage.spawn(move || {
            let mut batchers: FxHashMap<String, Option<Rebatcher>> = FxHashMap::default();
            let mut counter = 0;

            for batch in rx.iter() {
                for (r, m) in pairs_of(batch) {
                    let key = classifier.classify(&r, &mut counter);

                    let slot = batchers.entry(key).or_insert_with_key(|key| {
                        let (tx, out) = bounded(config.buffer_size);
                        let stream =
                            BatchStream::new(out, paired, stages.clone(), Arc::clone(&config));
                        tx_outputs
                            .send((key.clone(), stream))
                            .is_ok()
                            .then(|| Rebatcher::new(tx, batch_size, paired))
                    });

                    let open = match slot.as_mut() {
                        Some(batcher) => batcher.push(r, m)?,
                        None => true,
                    };
                    if !open {
                        *slot = None;
                    }
                }
            }

            for batcher in batchers.values_mut().flatten() {
                batcher.flush()?;
            }
            Ok(())
        });

        Distribution { outputs }
    }
}

use crate::errors::*;
use crate::record::{BioRecord, Mate, Side};

/// A numbered group of records moving through a stream as one unit.
///
/// In a paired batch `records[i]` and `mates[i]` are the forward and reverse
/// reads of one fragment; each carries the other's index as its [`Mate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    order: u64,
    records: Vec<BioRecord>,
    mates: Option<Vec<BioRecord>>,
}

impl Batch {
    pub fn new(order: u64, mut records: Vec<BioRecord>) -> Self {
        records.iter_mut().for_each(|r| r.set_mate(None));
        Self {
            order,
            records,
            mates: None,
        }
    }

    /// A paired batch. Both sides must have the same length.
    pub fn paired(order: u64, mut records: Vec<BioRecord>, mut mates: Vec<BioRecord>) -> Result<Self> {
        if records.len() != mates.len() {
            return Err(Error::UnpairedRead(format!(
                "batch {order}: {} forward reads but {} reverse reads",
                records.len(),
                mates.len()
            )));
        }

        for (i, (r, m)) in records.iter_mut().zip(mates.iter_mut()).enumerate() {
            r.set_mate(Some(Mate {
                side: Side::Reverse,
                index: i as u32,
            }));
            m.set_mate(Some(Mate {
                side: Side::Forward,
                index: i as u32,
            }));
        }

        Ok(Self {
            order,
            records,
            mates: Some(mates),
        })
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn set_order(&mut self, order: u64) {
        self.order = order;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_paired(&self) -> bool {
        self.mates.is_some()
    }

    pub fn records(&self) -> &[BioRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [BioRecord] {
        &mut self.records
    }

    pub fn mates(&self) -> Option<&[BioRecord]> {
        self.mates.as_deref()
    }

    pub fn mates_mut(&mut self) -> Option<&mut [BioRecord]> {
        self.mates.as_deref_mut()
    }

    /// The mate of `records[i]`.
    pub fn mate_of(&self, i: usize) -> Option<&BioRecord> {
        let m = self.records.get(i)?.mate()?;
        self.mates.as_ref()?.get(m.index as usize)
    }

    /// Drop the pairing, returning the reverse reads.
    pub fn unpair(&mut self) -> Option<Vec<BioRecord>> {
        self.records.iter_mut().for_each(|r| r.set_mate(None));
        let mut mates = self.mates.take()?;
        mates.iter_mut().for_each(|m| m.set_mate(None));
        Some(mates)
    }

    /// Keep the records (with their mates) for which `keep` holds.
    pub fn retain(&mut self, mut keep: impl FnMut(&BioRecord) -> bool) {
        let flags: Vec<bool> = self.records.iter().map(&mut keep).collect();

        let mut i = 0;
        self.records.retain(|_| {
            i += 1;
            flags[i - 1]
        });

        if let Some(mates) = &mut self.mates {
            let mut i = 0;
            mates.retain(|_| {
                i += 1;
                flags[i - 1]
            });

            for (i, (r, m)) in self.records.iter_mut().zip(mates.iter_mut()).enumerate() {
                r.set_mate(Some(Mate {
                    side: Side::Reverse,
                    index: i as u32,
                }));
                m.set_mate(Some(Mate {
                    side: Side::Forward,
                    index: i as u32,
                }));
            }
        }
    }

    /// Records and, for a paired batch, their mates.
    pub fn into_parts(self) -> (Vec<BioRecord>, Option<Vec<BioRecord>>) {
        (self.records, self.mates)
    }

    /// Forward records only; the pairing is dropped.
    pub fn into_records(mut self) -> Vec<BioRecord> {
        self.unpair();
        self.records
    }
}

use super::reorder::{H265PictureType, Picture};
use smallvec::SmallVec;
use std::{collections::VecDeque, ops::Deref};

/// Maximum number of reference pictures H.265 allows in a reference list or the DPB
pub const MAX_REFERENCES: usize = 15;

/// Reference picture as seen by the parameter sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePicture {
    pub poc: u32,

    /// Index into [`H265EncodeJob::references`](super::H265EncodeJob::references)
    pub index: u8,
}

/// List of at most 15 reference pictures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefList<T> {
    entries: SmallVec<[T; MAX_REFERENCES]>,
}

impl<T> Default for RefList<T> {
    fn default() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }
}

impl<T> RefList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: T) {
        assert!(
            self.entries.len() < MAX_REFERENCES,
            "reference list cannot hold more than {MAX_REFERENCES} entries"
        );

        self.entries.push(entry);
    }
}

impl<T> Deref for RefList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.entries
    }
}

impl<T> FromIterator<T> for RefList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = RefList::new();

        for entry in iter {
            list.push(entry);
        }

        list
    }
}

/// Returns if `a` comes after `b` in display order, taking the wraparound of the POC into account
pub(crate) fn poc_greater_than(a: u32, b: u32, max_poc: u32) -> bool {
    (a.wrapping_sub(b) & (max_poc - 1)) < max_poc / 2
}

/// Distance from `b` to `a` modulo `max_poc`
pub(crate) fn poc_distance(a: u32, b: u32, max_poc: u32) -> u32 {
    a.wrapping_sub(b) & (max_poc - 1)
}

/// Reference pictures preceding and following `poc` in display order, each ordered nearest first
///
/// This is the short-term reference picture set a picture must signal to keep `references` in the decoder's DPB.
pub(crate) fn split_references(
    references: &[ReferencePicture],
    poc: u32,
    max_poc: u32,
) -> (
    SmallVec<[ReferencePicture; MAX_REFERENCES]>,
    SmallVec<[ReferencePicture; MAX_REFERENCES]>,
) {
    let (mut before, mut after): (
        SmallVec<[ReferencePicture; MAX_REFERENCES]>,
        SmallVec<[ReferencePicture; MAX_REFERENCES]>,
    ) = references
        .iter()
        .copied()
        .partition(|reference| poc_greater_than(poc, reference.poc, max_poc));

    before.sort_by_key(|reference| poc_distance(poc, reference.poc, max_poc));
    after.sort_by_key(|reference| poc_distance(reference.poc, poc, max_poc));

    (before, after)
}

#[derive(Debug)]
struct ReferenceEntry<S> {
    poc: u32,
    surface: S,
}

/// Reconstructed pictures available as reference, oldest first
pub(crate) struct ReferenceStore<S> {
    entries: VecDeque<ReferenceEntry<S>>,

    max_reflist0_count: usize,
    max_reflist1_count: usize,
    max_poc: u32,
}

impl<S> ReferenceStore<S> {
    pub(crate) fn new(max_reflist0_count: u32, max_reflist1_count: u32, max_poc: u32) -> Self {
        let max_reflist0_count = max_reflist0_count as usize;
        let max_reflist1_count = max_reflist1_count as usize;

        assert!(max_reflist0_count + max_reflist1_count <= MAX_REFERENCES);
        assert!(max_poc.is_power_of_two());

        Self {
            entries: VecDeque::with_capacity(max_reflist0_count + max_reflist1_count),
            max_reflist0_count,
            max_reflist1_count,
            max_poc,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.max_reflist0_count + self.max_reflist1_count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert the reconstructed picture of an encoded picture.
    ///
    /// I pictures signal an empty reference picture set, so every older picture is dropped with them.
    /// Surfaces that are no longer needed are handed to `release`.
    pub(crate) fn update<F>(
        &mut self,
        picture: &Picture<F>,
        surface: S,
        mut release: impl FnMut(S),
    ) {
        // B-Frames are never used as reference
        if picture.picture_type == H265PictureType::B {
            release(surface);
            return;
        }

        if picture.picture_type == H265PictureType::I {
            self.clear(&mut release);
        } else if self.entries.len() >= self.capacity() {
            if let Some(evicted) = self.entries.pop_front() {
                log::trace!("Evict reference poc={}", evicted.poc);
                release(evicted.surface);
            }
        }

        self.entries.push_back(ReferenceEntry {
            poc: picture.poc,
            surface,
        });

        assert!(
            self.entries.len() <= self.capacity(),
            "reference store exceeds its capacity"
        );
    }

    /// Build the L0 & L1 reference lists for the given picture
    pub(crate) fn build_lists(
        &self,
        poc: u32,
        picture_type: H265PictureType,
    ) -> (RefList<ReferencePicture>, RefList<ReferencePicture>) {
        let mut l0 = RefList::new();
        let mut l1 = RefList::new();

        if picture_type == H265PictureType::I {
            return (l0, l1);
        }

        // Find the most recent entry preceding the current picture, everything before it belongs to L0, everything after to L1
        let boundary = self
            .entries
            .iter()
            .rposition(|entry| poc_greater_than(poc, entry.poc, self.max_poc));

        let list1_start = match boundary {
            Some(list0_start) => {
                for index in (0..=list0_start).rev().take(self.max_reflist0_count) {
                    l0.push(self.reference_picture(index));
                }

                list0_start + 1
            }
            None => 0,
        };

        if picture_type == H265PictureType::B {
            for index in (list1_start..self.entries.len()).take(self.max_reflist1_count) {
                l1.push(self.reference_picture(index));
            }
        }

        assert!(
            l0.len() + l1.len() <= self.capacity(),
            "reference lists exceed the reference store capacity"
        );

        (l0, l1)
    }

    /// All pictures in the store, oldest first
    pub(crate) fn reference_frames(&self) -> RefList<ReferencePicture> {
        (0..self.entries.len())
            .map(|index| self.reference_picture(index))
            .collect()
    }

    /// Surfaces of all pictures in the store, in the same order as [`ReferenceStore::reference_frames`]
    pub(crate) fn surfaces(&self) -> SmallVec<[&S; MAX_REFERENCES]> {
        self.entries.iter().map(|entry| &entry.surface).collect()
    }

    pub(crate) fn clear(&mut self, mut release: impl FnMut(S)) {
        for entry in self.entries.drain(..) {
            release(entry.surface);
        }
    }

    fn reference_picture(&self, index: usize) -> ReferencePicture {
        ReferencePicture {
            poc: self.entries[index].poc,
            index: index as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn picture(poc: u32, picture_type: H265PictureType, is_idr: bool) -> Picture<()> {
        Picture {
            poc,
            picture_type,
            is_idr,
            frame: (),
        }
    }

    fn pocs(list: &RefList<ReferencePicture>) -> Vec<u32> {
        list.iter().map(|r| r.poc).collect()
    }

    #[test]
    fn poc_comparison_wraps() {
        assert!(poc_greater_than(5, 3, 16));
        assert!(!poc_greater_than(3, 5, 16));
        assert!(poc_greater_than(1, 14, 16));
        assert!(!poc_greater_than(14, 1, 16));
        assert_eq!(poc_distance(1, 14, 16), 3);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        for num_ref_frames in 1..=4 {
            for num_bframes in 0..=3 {
                let l1 = u32::from(num_bframes > 0);
                let mut store = ReferenceStore::new(num_ref_frames, l1, 256);
                let mut released = 0;

                store.update(&picture(0, H265PictureType::I, true), 0, |_| released += 1);

                for poc in 1..40 {
                    store.update(&picture(poc, H265PictureType::P, false), poc, |_| {
                        released += 1
                    });
                    store.update(&picture(poc, H265PictureType::B, false), poc, |_| {
                        released += 1
                    });

                    assert!(store.len() <= store.capacity());
                }

                // every surface that is not in the store must have been released
                assert_eq!(released + store.len(), 1 + 39 * 2);
            }
        }
    }

    #[test]
    fn idr_clears_store() {
        let mut store = ReferenceStore::new(3, 0, 16);
        let mut released = vec![];

        store.update(&picture(0, H265PictureType::I, true), 10, |s| released.push(s));
        store.update(&picture(1, H265PictureType::P, false), 11, |s| released.push(s));
        store.update(&picture(0, H265PictureType::I, true), 12, |s| released.push(s));

        assert_eq!(released, vec![10, 11]);
        assert_eq!(store.len(), 1);
        assert_eq!(pocs(&store.reference_frames()), vec![0]);
    }

    #[test]
    fn intra_picture_clears_store() {
        let mut store = ReferenceStore::new(2, 0, 16);
        let mut released = vec![];

        store.update(&picture(0, H265PictureType::I, true), 10, |s| released.push(s));
        store.update(&picture(1, H265PictureType::P, false), 11, |s| released.push(s));
        store.update(&picture(2, H265PictureType::I, false), 12, |s| released.push(s));

        assert_eq!(released, vec![10, 11]);
        assert_eq!(pocs(&store.reference_frames()), vec![2]);

        let (l0, _) = store.build_lists(3, H265PictureType::P);
        assert_eq!(pocs(&l0), vec![2]);
    }

    #[test]
    fn references_split_around_current_picture() {
        let references: RefList<ReferencePicture> = [0, 3, 6, 1]
            .into_iter()
            .enumerate()
            .map(|(index, poc)| ReferencePicture {
                poc,
                index: index as u8,
            })
            .collect();

        let (before, after) = split_references(&references, 4, 16);
        assert_eq!(before.iter().map(|r| r.poc).collect::<Vec<_>>(), vec![3, 1, 0]);
        assert_eq!(after.iter().map(|r| r.poc).collect::<Vec<_>>(), vec![6]);
        assert_eq!(after[0].index, 2);

        // 14 and 15 precede 1 after the wraparound
        let references: RefList<ReferencePicture> = [14, 15]
            .into_iter()
            .enumerate()
            .map(|(index, poc)| ReferencePicture {
                poc,
                index: index as u8,
            })
            .collect();

        let (before, after) = split_references(&references, 1, 16);
        assert_eq!(before.iter().map(|r| r.poc).collect::<Vec<_>>(), vec![15, 14]);
        assert!(after.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted() {
        let mut store = ReferenceStore::new(2, 0, 16);
        let mut released = vec![];

        for poc in 0..4 {
            store.update(
                &picture(poc, H265PictureType::P, poc == 0),
                poc,
                |s| released.push(s),
            );
        }

        assert_eq!(released, vec![0, 1]);
        assert_eq!(pocs(&store.reference_frames()), vec![2, 3]);
    }

    #[test]
    fn p_list_is_most_recent_first() {
        let mut store = ReferenceStore::new(3, 0, 16);

        for poc in 0..3 {
            store.update(&picture(poc, H265PictureType::P, poc == 0), (), |_| {});
        }

        let (l0, l1) = store.build_lists(3, H265PictureType::P);
        assert_eq!(pocs(&l0), vec![2, 1, 0]);
        assert!(l1.is_empty());

        assert_eq!(l0[0].index, 2);
    }

    #[test]
    fn b_lists_split_at_current_poc() {
        let mut store = ReferenceStore::new(2, 1, 16);

        store.update(&picture(0, H265PictureType::I, true), (), |_| {});
        store.update(&picture(3, H265PictureType::P, false), (), |_| {});

        let (l0, l1) = store.build_lists(1, H265PictureType::B);
        assert_eq!(pocs(&l0), vec![0]);
        assert_eq!(pocs(&l1), vec![3]);
    }

    #[test]
    fn b_lists_respect_wraparound() {
        let mut store = ReferenceStore::new(2, 1, 16);

        store.update(&picture(13, H265PictureType::P, false), (), |_| {});
        store.update(&picture(1, H265PictureType::P, false), (), |_| {});

        // poc 15 lies between 13 and 1 (=17)
        let (l0, l1) = store.build_lists(15, H265PictureType::B);
        assert_eq!(pocs(&l0), vec![13]);
        assert_eq!(pocs(&l1), vec![1]);
    }

    #[test]
    fn lists_are_capped() {
        let mut store = ReferenceStore::new(1, 1, 64);

        store.update(&picture(0, H265PictureType::I, true), (), |_| {});
        store.update(&picture(4, H265PictureType::P, false), (), |_| {});

        let (l0, l1) = store.build_lists(8, H265PictureType::P);
        assert_eq!(pocs(&l0), vec![4]);
        assert!(l1.is_empty());

        let (l0, _) = store.build_lists(3, H265PictureType::I);
        assert!(l0.is_empty());
    }

    #[test]
    #[should_panic]
    fn ref_list_is_bounded() {
        let _list: RefList<u32> = (0..16).collect();
    }
}

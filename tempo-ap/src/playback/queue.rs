//! Queue navigation rules
//!
//! One rule decides where both auto-advance and a manual skip go next.
//! Repeat-one is not handled here: the session restarts the track on end
//! before asking.

use super::state::PlaybackState;
use rand::Rng;
use tempo_common::events::RepeatMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextIndex {
    Index(usize),
    EndOfQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousIndex {
    Index(usize),
    /// Stay on the current track and start it over
    Restart,
}

/// Queue position after the current one
///
/// Shuffle picks uniformly among the other positions; a single-entry queue
/// only loops with repeat=all. In order, the end wraps only with repeat=all.
pub fn next_index<R: Rng + ?Sized>(state: &PlaybackState, rng: &mut R) -> NextIndex {
    let len = state.queue.len();
    if len == 0 {
        return NextIndex::EndOfQueue;
    }

    if state.shuffle {
        return random_other(state, rng);
    }

    match state.queue_index {
        None => NextIndex::Index(0),
        Some(i) if i + 1 < len => NextIndex::Index(i + 1),
        Some(_) if state.repeat == RepeatMode::All => NextIndex::Index(0),
        Some(_) => NextIndex::EndOfQueue,
    }
}

/// Queue position for a "previous" press that is not a restart
pub fn previous_index<R: Rng + ?Sized>(state: &PlaybackState, rng: &mut R) -> PreviousIndex {
    let len = state.queue.len();
    if len == 0 {
        return PreviousIndex::Restart;
    }

    if state.shuffle {
        return match random_other(state, rng) {
            NextIndex::Index(i) => PreviousIndex::Index(i),
            NextIndex::EndOfQueue => PreviousIndex::Restart,
        };
    }

    match state.queue_index {
        Some(i) if i > 0 => PreviousIndex::Index(i - 1),
        Some(_) if state.repeat == RepeatMode::All => PreviousIndex::Index(len - 1),
        _ => PreviousIndex::Restart,
    }
}

fn random_other<R: Rng + ?Sized>(state: &PlaybackState, rng: &mut R) -> NextIndex {
    let len = state.queue.len();
    match state.queue_index {
        Some(_) if len == 1 => {
            if state.repeat == RepeatMode::All {
                NextIndex::Index(0)
            } else {
                NextIndex::EndOfQueue
            }
        }
        Some(current) => {
            // pick among len-1 slots and skip over the current one
            let pick = rng.gen_range(0..len - 1);
            NextIndex::Index(if pick >= current { pick + 1 } else { pick })
        }
        None => NextIndex::Index(rng.gen_range(0..len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrackId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state(len: usize, index: Option<usize>, shuffle: bool, repeat: RepeatMode) -> PlaybackState {
        let mut state = PlaybackState::default();
        state.queue = (0..len).map(|_| TrackId::new()).collect();
        state.queue_index = index;
        state.current_track_id = index.map(|i| state.queue[i]);
        state.shuffle = shuffle;
        state.repeat = repeat;
        state
    }

    #[test]
    fn in_order_advances_and_stops_at_end() {
        let mut rng = StdRng::seed_from_u64(1);
        let s = state(3, Some(0), false, RepeatMode::None);
        assert_eq!(next_index(&s, &mut rng), NextIndex::Index(1));

        let s = state(3, Some(2), false, RepeatMode::None);
        assert_eq!(next_index(&s, &mut rng), NextIndex::EndOfQueue);

        let s = state(3, Some(2), false, RepeatMode::All);
        assert_eq!(next_index(&s, &mut rng), NextIndex::Index(0));
    }

    #[test]
    fn n_steps_with_repeat_all_come_back() {
        let mut rng = StdRng::seed_from_u64(2);
        for len in 2..7 {
            let mut s = state(len, Some(1), false, RepeatMode::All);
            for _ in 0..len {
                match next_index(&s, &mut rng) {
                    NextIndex::Index(i) => {
                        s.select(i);
                    }
                    NextIndex::EndOfQueue => panic!("repeat=all never ends"),
                }
            }
            assert_eq!(s.queue_index, Some(1));
        }
    }

    #[test]
    fn shuffle_never_picks_current() {
        let mut rng = StdRng::seed_from_u64(3);
        let s = state(4, Some(2), true, RepeatMode::None);
        let mut seen = [false; 4];
        for _ in 0..400 {
            match next_index(&s, &mut rng) {
                NextIndex::Index(i) => {
                    assert_ne!(i, 2);
                    seen[i] = true;
                }
                NextIndex::EndOfQueue => panic!("shuffle over 4 entries never ends"),
            }
        }
        assert!(seen[0] && seen[1] && seen[3]);
    }

    #[test]
    fn single_entry_shuffle_loops_only_with_repeat_all() {
        let mut rng = StdRng::seed_from_u64(4);
        let s = state(1, Some(0), true, RepeatMode::None);
        assert_eq!(next_index(&s, &mut rng), NextIndex::EndOfQueue);
        let s = state(1, Some(0), true, RepeatMode::All);
        assert_eq!(next_index(&s, &mut rng), NextIndex::Index(0));
    }

    #[test]
    fn empty_queue_has_no_next() {
        let mut rng = StdRng::seed_from_u64(5);
        let s = state(0, None, false, RepeatMode::All);
        assert_eq!(next_index(&s, &mut rng), NextIndex::EndOfQueue);
    }

    #[test]
    fn previous_steps_back_or_wraps() {
        let mut rng = StdRng::seed_from_u64(6);
        let s = state(3, Some(2), false, RepeatMode::None);
        assert_eq!(previous_index(&s, &mut rng), PreviousIndex::Index(1));

        let s = state(3, Some(0), false, RepeatMode::None);
        assert_eq!(previous_index(&s, &mut rng), PreviousIndex::Restart);

        let s = state(3, Some(0), false, RepeatMode::All);
        assert_eq!(previous_index(&s, &mut rng), PreviousIndex::Index(2));
    }
}

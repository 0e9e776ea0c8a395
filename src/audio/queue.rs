use rand::seq::SliceRandom;
use std::{collections::VecDeque, fmt, time::Duration};
use tracing::{debug, info};

use super::{error::PlayerError, track::Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    One,
    All,
}

impl LoopMode {
    /// off → one → all → off, as the loop button cycles.
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::One,
            LoopMode::One => LoopMode::All,
            LoopMode::All => LoopMode::Off,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(LoopMode::Off),
            "one" | "track" => Some(LoopMode::One),
            "all" | "queue" => Some(LoopMode::All),
            _ => None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopMode::Off => "off",
            LoopMode::One => "one",
            LoopMode::All => "all",
        })
    }
}

/// Ordered, bounded FIFO of tracks waiting to be played.
///
/// The currently playing track is never stored here.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un track al final de la cola
    pub fn enqueue(&mut self, track: Track) -> Result<(), PlayerError> {
        if self.items.len() >= self.max_size {
            return Err(PlayerError::QueueFull { max: self.max_size });
        }

        debug!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
        Ok(())
    }

    /// Obtiene el siguiente track (FIFO)
    pub fn dequeue_front(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        if let Some(ref track) = next {
            debug!("➡️ Siguiente en cola (FIFO): {}", track.title());
        }
        next
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.items.iter().cloned().collect()
    }

    /// Elimina el track en la posición `index` (base 1)
    pub fn remove_at(&mut self, index: usize) -> Result<Track, PlayerError> {
        let len = self.items.len();
        if index == 0 || index > len {
            return Err(PlayerError::IndexOutOfRange { index, len });
        }

        let removed = self
            .items
            .remove(index - 1)
            .ok_or(PlayerError::IndexOutOfRange { index, len })?;
        debug!("❌ Track eliminado en posición {}: {}", index, removed.title());
        Ok(removed)
    }

    /// Mezcla la cola en su lugar
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} canciones)", self.items.len());
    }

    /// Limpia la cola, devuelve cuántos tracks se eliminaron
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn total_duration(&self) -> Duration {
        self.items.iter().filter_map(|track| track.duration()).sum()
    }
}

/// One page of a queue snapshot, for display.
#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    /// 1-based position of the first item on this page.
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl QueuePage {
    pub fn from_snapshot(snapshot: &[Track], page: usize, items_per_page: usize) -> Self {
        let items_per_page = items_per_page.max(1);
        let total_items = snapshot.len();
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(items_per_page)
        };
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(total_items);

        Self {
            items: snapshot.get(start..end).map(<[Track]>::to_vec).unwrap_or_default(),
            first_position: start + 1,
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(n: usize) -> Track {
        Track::new(format!("Track {}", n), format!("https://youtu.be/{}", n))
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.snapshot().iter().map(|t| t.title().to_string()).collect()
    }

    #[test]
    fn test_enqueue_keeps_insertion_order_until_bound() {
        let mut queue = TrackQueue::new(3);
        for n in 1..=3 {
            queue.enqueue(track(n)).unwrap();
        }

        assert_eq!(
            queue.enqueue(track(4)),
            Err(PlayerError::QueueFull { max: 3 })
        );
        assert_eq!(queue.len(), 3);
        assert_eq!(titles(&queue), vec!["Track 1", "Track 2", "Track 3"]);
    }

    #[test]
    fn test_dequeue_front_on_empty_is_none() {
        let mut queue = TrackQueue::new(10);
        assert!(queue.dequeue_front().is_none());

        queue.enqueue(track(1)).unwrap();
        queue.enqueue(track(2)).unwrap();
        assert_eq!(queue.dequeue_front().unwrap().title(), "Track 1");
        assert_eq!(titles(&queue), vec!["Track 2"]);
    }

    #[test]
    fn test_remove_at_is_one_based() {
        let mut queue = TrackQueue::new(10);
        for n in 1..=4 {
            queue.enqueue(track(n)).unwrap();
        }

        let removed = queue.remove_at(2).unwrap();
        assert_eq!(removed.title(), "Track 2");
        assert_eq!(titles(&queue), vec!["Track 1", "Track 3", "Track 4"]);
    }

    #[test]
    fn test_remove_at_out_of_range_leaves_queue() {
        let mut queue = TrackQueue::new(10);
        queue.enqueue(track(1)).unwrap();
        queue.enqueue(track(2)).unwrap();

        assert_eq!(
            queue.remove_at(0),
            Err(PlayerError::IndexOutOfRange { index: 0, len: 2 })
        );
        assert_eq!(
            queue.remove_at(3),
            Err(PlayerError::IndexOutOfRange { index: 3, len: 2 })
        );
        assert_eq!(titles(&queue), vec!["Track 1", "Track 2"]);
    }

    #[test]
    fn test_shuffle_preserves_tracks() {
        let mut queue = TrackQueue::new(100);
        for n in 0..50 {
            queue.enqueue(track(n)).unwrap();
        }

        queue.shuffle();

        let mut after = titles(&queue);
        after.sort();
        let mut expected: Vec<String> = (0..50).map(|n| format!("Track {}", n)).collect();
        expected.sort();
        assert_eq!(after, expected);
    }

    #[test]
    fn test_clear_reports_count() {
        let mut queue = TrackQueue::new(10);
        queue.enqueue(track(1)).unwrap();
        queue.enqueue(track(2)).unwrap();

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_loop_mode_cycle_and_parse() {
        assert_eq!(LoopMode::Off.next(), LoopMode::One);
        assert_eq!(LoopMode::One.next(), LoopMode::All);
        assert_eq!(LoopMode::All.next(), LoopMode::Off);
        assert_eq!(LoopMode::parse("ONE"), Some(LoopMode::One));
        assert_eq!(LoopMode::parse("queue"), Some(LoopMode::All));
        assert_eq!(LoopMode::parse("forever"), None);
    }

    #[test]
    fn test_queue_page_bounds() {
        let snapshot: Vec<Track> = (1..=25).map(track).collect();

        let page = QueuePage::from_snapshot(&snapshot, 3, 10);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.first_position, 21);
        assert_eq!(page.total_pages, 3);

        let clamped = QueuePage::from_snapshot(&snapshot, 99, 10);
        assert_eq!(clamped.current_page, 3);

        let empty = QueuePage::from_snapshot(&[], 1, 10);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.items.is_empty());
    }
}

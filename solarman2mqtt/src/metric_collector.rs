use crate::publication::Publication;

pub trait MetricCollector {
    /// Delivers the publications in order and returns how many failed.
    fn publish(&mut self, publications: &[Publication]) -> usize;

    /// Ends the session and returns how many already accepted publications
    /// were lost on the way out.
    fn close(&mut self) -> usize {
        0
    }
}

//! Time-scheduled parameter values (gain envelopes, frequencies).

#[derive(Debug, Clone, Copy, PartialEq)]
enum Segment {
    /// Value jumps at the point's time.
    Step,
    /// Value ramps linearly from the previous point and arrives at the
    /// point's time.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    time: f64,
    value: f64,
    segment: Segment,
}

/// Ordered automation points for a single parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTimeline {
    intrinsic: f64,
    points: Vec<Point>,
}

impl ParamTimeline {
    /// Creates a timeline that holds `intrinsic` until automation says
    /// otherwise.
    pub fn new(intrinsic: f64) -> Self {
        Self {
            intrinsic,
            points: Vec::new(),
        }
    }

    pub fn set_value_at(&mut self, value: f64, time: f64) {
        self.insert(Point {
            time,
            value,
            segment: Segment::Step,
        });
    }

    pub fn linear_ramp_to(&mut self, value: f64, time: f64) {
        self.insert(Point {
            time,
            value,
            segment: Segment::Linear,
        });
    }

    /// Removes all automation; the intrinsic value applies again.
    pub fn cancel_all(&mut self) {
        self.points.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Value of the parameter at `time`.
    pub fn value_at(&self, time: f64) -> f64 {
        let next = self.points.partition_point(|point| point.time <= time);
        let previous = next.checked_sub(1).map(|index| &self.points[index]);

        match (previous, self.points.get(next)) {
            (Some(from), Some(to)) if to.segment == Segment::Linear => {
                let span = to.time - from.time;
                if span <= f64::EPSILON {
                    return to.value;
                }
                from.value + (to.value - from.value) * (time - from.time) / span
            }
            (Some(from), _) => from.value,
            (None, _) => self.intrinsic,
        }
    }

    /// Forgets points that can no longer influence values at or after `time`.
    pub fn prune_before(&mut self, time: f64) {
        let next = self.points.partition_point(|point| point.time <= time);
        if next > 1 {
            self.points.drain(..next - 1);
        }
    }

    fn insert(&mut self, point: Point) {
        let index = self.points.partition_point(|existing| existing.time <= point.time);
        self.points.insert(index, point);
    }
}

impl Default for ParamTimeline {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn holds_intrinsic_value_without_automation() {
        let timeline = ParamTimeline::new(1.0);
        assert_eq!(timeline.value_at(3.0), 1.0);
    }

    #[test]
    fn builds_click_envelope() {
        let mut gain = ParamTimeline::new(1.0);
        gain.set_value_at(0.0, 0.999);
        gain.linear_ramp_to(4.0, 1.0);
        gain.linear_ramp_to(0.0, 1.019);

        assert_eq!(gain.value_at(0.5), 1.0);
        assert_eq!(gain.value_at(0.999), 0.0);
        assert!(close(gain.value_at(0.9995), 2.0));
        assert!(close(gain.value_at(1.0), 4.0));
        assert!(close(gain.value_at(1.0095), 2.0));
        assert_eq!(gain.value_at(2.0), 0.0);
    }

    #[test]
    fn cancel_restores_intrinsic_value() {
        let mut freq = ParamTimeline::new(440.0);
        freq.set_value_at(880.0, 0.5);
        freq.cancel_all();

        assert!(freq.is_empty());
        assert_eq!(freq.value_at(1.0), 440.0);
    }

    #[test]
    fn pruning_keeps_values_from_the_cut_onwards() {
        let mut gain = ParamTimeline::new(1.0);
        gain.set_value_at(0.0, 1.0);
        gain.linear_ramp_to(1.0, 2.0);
        gain.set_value_at(0.5, 3.0);
        gain.linear_ramp_to(0.0, 4.0);

        let before: Vec<f64> = [3.2, 3.5, 4.5].iter().map(|t| gain.value_at(*t)).collect();
        gain.prune_before(3.1);
        let after: Vec<f64> = [3.2, 3.5, 4.5].iter().map(|t| gain.value_at(*t)).collect();

        assert_eq!(before, after);
        assert_eq!(gain.points.len(), 2);
    }
}

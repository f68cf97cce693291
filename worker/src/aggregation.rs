use nebula_windowing::WindowAggregation;

/// Sums the `id` column within a window -- the demo query's aggregate
/// (scenario: "tumbling window 1s, sum over `id`").
pub struct SumAggregation;

impl WindowAggregation for SumAggregation {
    type Input = i64;
    type Partial = i64;
    type Final = i64;

    fn initial(&self) -> i64 {
        0
    }

    fn add(&self, partial: &mut i64, input: &i64) {
        *partial += input;
    }

    fn combine(&self, left: &i64, right: &i64) -> i64 {
        left + right
    }

    fn lower(&self, partial: &i64) -> i64 {
        *partial
    }
}

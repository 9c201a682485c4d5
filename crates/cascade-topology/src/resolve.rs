use cascade_config::{Pipeline, Step};

use crate::flatten::StepTree;
use crate::path::StagePath;

/// Find the step declared at `path` in the original config tree.
///
/// `subwaterfall` segments are looked up through the `parallel` key. Returns
/// `None` when any segment is missing; callers treat that as "nothing to run".
pub fn resolve<'a>(pipeline: &'a Pipeline, path: &StagePath) -> Option<&'a Step> {
  let (first, rest) = path.segments().split_first()?;
  let mut step = pipeline.children(first.kind)?.get(first.index)?;

  for segment in rest {
    step = step.children(segment.kind)?.get(segment.index)?;
  }

  Some(step)
}

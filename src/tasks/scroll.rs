use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ScrollOptions;
use crate::viewport::ScrollViewport;

/// Scrolls `viewport` from its current offset to the bottom of the page, one
/// step per interval. Returns the number of steps taken.
#[instrument(skip(viewport, cancel), fields(step = opts.step))]
pub async fn run(
    viewport: Arc<ScrollViewport>,
    opts: ScrollOptions,
    cancel: CancellationToken,
) -> Result<usize> {
    let mut ticks = 0;
    loop {
        let page_height = viewport.page_height();
        let view = viewport.viewport();
        if view.bottom() >= page_height {
            info!(ticks, offset = view.y, "reached bottom of page");
            break;
        }

        select! {
            biased;

            _ = cancel.cancelled() => {
                info!(ticks, "cancel received; stopping scroll");
                break;
            }

            _ = sleep(opts.interval) => {
                let step = opts.step.min(page_height - view.bottom());
                viewport.scroll_by(step);
                ticks += 1;
                debug!(offset = view.y + step, "scrolled");
            }
        }
    }
    Ok(ticks)
}

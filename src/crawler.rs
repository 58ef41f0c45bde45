//! The crawler worker: the central state machine that turns a task off the
//! task queue into zero or more records on the result queue.
//!
//! The original recursed inside the worker loop to both paginate a region
//! and subdivide an oversized one. We replace that with an explicit stack
//! of `Frame`s, popped and processed one at a time — subdivision just
//! pushes four new frames instead of making four nested calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::format_err;
use geo::Polygon;
use tracing::{instrument, warn};

use crate::aoi;
use crate::coords::{round6, transform, web_mercator_to_bd09_inline, Projection};
use crate::poi::{normalize_tag, wants_detail, PoiRecord, RecordSource};
use crate::store::CoordinationStore;
use crate::upstream::{Action, RawPoi, RegionRef, UpstreamClient};
use crate::Result;

/// How long to sleep when no credential or no task is available.
const IDLE_SLEEP: Duration = Duration::from_secs(60);
/// How long to sleep after any non-success upstream response, before
/// picking up the next frame.
const RETRY_SLEEP: Duration = Duration::from_secs(5);

/// One unit of pending work: a keyword search over a region, at a given
/// page.
#[derive(Clone, Debug, PartialEq)]
struct Frame {
    keyword: String,
    region: RegionRef,
    page_num: u64,
}

impl Frame {
    fn task_string(&self) -> String {
        format!("{}#{}", self.region.to_task_string(), self.keyword)
    }
}

/// The crawler worker.
pub struct CrawlerWorker {
    store: Arc<dyn CoordinationStore>,
    upstream: Arc<dyn UpstreamClient>,
    categories: HashMap<String, String>,
    source: RecordSource,
    /// When set, the visited-set *read* gate is skipped, so an
    /// already-seen POI is re-fetched and re-parsed. The check-and-set
    /// gate guarding `push_result` is never skipped, so this cannot
    /// duplicate a result-queue entry (spec open question on `update_flag`).
    update: bool,
}

impl CrawlerWorker {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        upstream: Arc<dyn UpstreamClient>,
        categories: HashMap<String, String>,
        source: RecordSource,
        update: bool,
    ) -> Self {
        CrawlerWorker {
            store,
            upstream,
            categories,
            source,
            update,
        }
    }

    /// Run forever: pop tasks off the queue and process them, sleeping
    /// whenever there is no credential or no task available.
    pub async fn run(&self) -> Result<()> {
        loop {
            if self.store.credential_count().await? == 0 {
                tokio::time::sleep(IDLE_SLEEP).await;
                continue;
            }
            match self.store.pop_task().await? {
                None => {
                    tokio::time::sleep(IDLE_SLEEP).await;
                }
                Some(task) => {
                    if let Err(err) = self.process_task(&task).await {
                        warn!(error = %err, %task, "dropping malformed task");
                    }
                }
            }
        }
    }

    /// Process one `region#query` task to completion, including any
    /// subdivision or pagination it spawns.
    #[instrument(level = "debug", skip(self))]
    pub async fn process_task(&self, task: &str) -> Result<()> {
        let (region_str, keyword) = task
            .split_once('#')
            .ok_or_else(|| format_err!("malformed task {:?}: expected \"region#query\"", task))?;
        let mut stack = vec![Frame {
            keyword: keyword.to_owned(),
            region: RegionRef::parse(region_str),
            page_num: 0,
        }];
        while let Some(frame) = stack.pop() {
            self.process_frame(frame, &mut stack).await?;
        }
        Ok(())
    }

    async fn process_frame(&self, frame: Frame, stack: &mut Vec<Frame>) -> Result<()> {
        let Some(credential) = self.store.sample_credential().await? else {
            self.store.requeue_task_head(&frame.task_string()).await?;
            return Ok(());
        };

        let page = match self
            .upstream
            .search(&frame.keyword, &frame.region, frame.page_num, &credential)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                // Transport failure: requeue at the tail and keep the
                // credential, no sleep. Never let a single bad request
                // upstream kill the whole worker loop.
                warn!(error = %err, task = %frame.task_string(), "transport failure; requeuing");
                self.store.push_task(&frame.task_string()).await?;
                return Ok(());
            }
        };

        match page.action {
            Action::Success => {
                for raw in &page.pois {
                    if let Err(err) = self.handle_poi(raw, &credential).await {
                        warn!(error = %err, uid = %raw.uid, "could not process record; skipping");
                    }
                }

                let cap = self.upstream.result_cap();
                let page_size = self.upstream.page_size();
                let total = page.total.unwrap_or(0);

                if total >= cap {
                    match &frame.region {
                        RegionRef::BBox { .. } => {
                            for quadrant in frame.region.subdivide() {
                                stack.push(Frame {
                                    keyword: frame.keyword.clone(),
                                    region: quadrant,
                                    page_num: 0,
                                });
                            }
                        }
                        RegionRef::Name(name) => {
                            warn!(
                                region = %name,
                                total,
                                "result cap reached for a named region that cannot be subdivided"
                            );
                        }
                    }
                } else {
                    let next_page = frame.page_num + 1;
                    if next_page * page_size < total {
                        stack.push(Frame {
                            keyword: frame.keyword.clone(),
                            region: frame.region.clone(),
                            page_num: next_page,
                        });
                    }
                }
            }
            Action::QuotaExhausted | Action::IpRejected => {
                self.store.remove_credential(&credential).await?;
                self.store.requeue_task_head(&frame.task_string()).await?;
                tokio::time::sleep(RETRY_SLEEP).await;
            }
            Action::RateLimited => {
                self.store.requeue_task_head(&frame.task_string()).await?;
                tokio::time::sleep(RETRY_SLEEP).await;
            }
            Action::BadRequest => {
                warn!(task = %frame.task_string(), "upstream rejected request as malformed; dropping");
                tokio::time::sleep(RETRY_SLEEP).await;
            }
            Action::Unknown(code) => {
                warn!(code = %code, task = %frame.task_string(), "unrecognized upstream status code");
                tokio::time::sleep(RETRY_SLEEP).await;
            }
        }
        Ok(())
    }

    async fn handle_poi(&self, raw: &RawPoi, credential: &str) -> Result<()> {
        if !self.update && self.store.is_visited(&raw.uid).await? {
            return Ok(());
        }

        let tag = normalize_tag(&raw.tag, &self.categories);
        let attribute = if wants_detail(&tag) {
            self.upstream.detail(&raw.uid, credential).await?
        } else {
            None
        };

        let (lon, lat) = transform(self.native_projection(), Projection::Wgs84, raw.lon, raw.lat);

        let aoi = match self.upstream.aoi(&raw.uid, credential).await? {
            Some(packed) => self.decode_aoi(&packed),
            None => None,
        };

        let Some(record) = PoiRecord::new(
            raw.uid.clone(),
            raw.name.clone(),
            lon,
            lat,
            raw.tag.clone(),
            raw.telephone.clone(),
            raw.province.clone(),
            raw.area.clone(),
            raw.district.clone(),
            attribute,
            aoi,
            &self.categories,
        ) else {
            return Ok(());
        };

        if self.store.mark_visited(&record.uid).await? {
            self.store.push_result(&record.to_wire()).await?;
        }
        Ok(())
    }

    /// The upstream's native coordinate system for raw search-result
    /// points: BD-09 for baidu, GCJ-02 for gaode.
    fn native_projection(&self) -> Projection {
        match self.source {
            RecordSource::Baidu => Projection::Bd09,
            RecordSource::Gaode => Projection::Gcj02,
        }
    }

    /// Decode a packed AOI string into a WGS-84 WKT polygon. Ring
    /// coordinates arrive in Baidu's internal Mercator grid (BD09MC) and
    /// are projected BD09MC->BD09->WGS-84, the former hop via the banded
    /// polynomial (baidu's internal map front-door always packs AOIs this
    /// way, regardless of which upstream this worker crawls).
    fn decode_aoi(&self, packed: &str) -> Option<String> {
        let decoded = match aoi::decode(packed) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "could not decode AOI string; skipping");
                return None;
            }
        };

        let polygons: Vec<Polygon<f64>> = decoded
            .rings
            .into_iter()
            .map(|ring| {
                let projected: Vec<(f64, f64)> = ring
                    .into_iter()
                    .filter_map(|(x, y)| {
                        let (bx, by) = match web_mercator_to_bd09_inline(x, y) {
                            Ok(point) => point,
                            Err(err) => {
                                warn!(error = %err, "could not project AOI ring point; skipping point");
                                return None;
                            }
                        };
                        let (lon, lat) = transform(Projection::Bd09, Projection::Wgs84, bx, by);
                        Some((round6(lon), round6(lat)))
                    })
                    .collect();
                aoi::ring_to_polygon(&projected)
            })
            .collect();

        Some(aoi::to_wkt(&aoi::assemble(polygons)))
    }
}

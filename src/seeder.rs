//! The task seeder: turns a city list (city mode) or a WKT grid file (grid
//! mode) into `region#query` tasks on the coordination store's task queue.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{format_err, Context};
use geo::{MultiPolygon, Polygon};
use wkt::TryFromWkt;

use crate::geohash;
use crate::store::CoordinationStore;
use crate::Result;

/// A province/city polygon loaded from a grid-mode city file.
#[derive(Clone, Debug)]
pub struct GridCityEntry {
    pub province: String,
    pub city: String,
    pub polygon: Polygon<f64>,
}

/// Load a `label:WKT` grid file, one polygon per line.
///
/// `label` follows the original's `"{prov}_{city}|..."` convention; only
/// the leading `prov_city` segment before the first `|` is used.
pub fn load_grid_file(path: &Path) -> Result<Vec<GridCityEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read grid file {}", path.display()))?;

    let mut entries = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (label, wkt_str) = line
            .split_once(':')
            .ok_or_else(|| format_err!("grid file line {}: missing \":\" separator", line_no + 1))?;
        let prov_city = label.split('|').next().unwrap_or(label);
        let mut parts = prov_city.splitn(2, '_');
        let province = parts.next().unwrap_or("").to_owned();
        let city = parts.next().unwrap_or("").to_owned();
        let polygon = Polygon::<f64>::try_from_wkt_str(wkt_str.trim())
            .map_err(|e| format_err!("grid file line {}: invalid WKT: {}", line_no + 1, e))?;
        entries.push(GridCityEntry { province, city, polygon });
    }
    Ok(entries)
}

/// Seeds the task queue.
pub struct TaskSeeder {
    store: Arc<dyn CoordinationStore>,
}

impl TaskSeeder {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        TaskSeeder { store }
    }

    /// Push one `region#query` task.
    pub async fn push_task(&self, region: &str, query: &str) -> Result<()> {
        self.store.push_task(&format!("{}#{}", region, query)).await
    }

    /// City mode: push one task per named city, letting the upstream
    /// resolve the name directly (no geohash tiling needed).
    pub async fn seed_cities(&self, cities: &[String], query: &str) -> Result<usize> {
        for city in cities {
            self.push_task(city, query).await?;
        }
        Ok(cities.len())
    }

    /// Grid mode: tile a single polygon into geohash cells at `precision`
    /// and push one bbox task per cell.
    pub async fn seed_grid(
        &self,
        polygon: &Polygon<f64>,
        precision: usize,
        query: &str,
    ) -> Result<usize> {
        self.seed_cells(geohash::polygon_geohasher(polygon, precision, precision, true), query)
            .await
    }

    /// Grid mode for a city made of several disjoint polygons: union the
    /// geohash cells from every sub-polygon before seeding, so a cell
    /// shared by two sub-polygons is only seeded once.
    pub async fn seed_grid_multi(
        &self,
        shape: &MultiPolygon<f64>,
        precision: usize,
        query: &str,
    ) -> Result<usize> {
        let mut cells = HashSet::new();
        for polygon in &shape.0 {
            cells.extend(geohash::polygon_geohasher(polygon, precision, precision, true));
        }
        self.seed_cells(cells, query).await
    }

    /// Grid mode resolved against a loaded grid file: `region == "*"`
    /// seeds every entry ("nationwide"); a `region` matching some entry's
    /// province seeds every city in that province; otherwise `region` is
    /// treated as a city name and only entries with that city are seeded.
    /// Errors if nothing matches.
    pub async fn seed_grid_region(
        &self,
        entries: &[GridCityEntry],
        region: &str,
        precision: usize,
        query: &str,
    ) -> Result<usize> {
        let matched: Vec<&GridCityEntry> = if region == "*" {
            entries.iter().collect()
        } else if entries.iter().any(|e| e.province == region) {
            entries.iter().filter(|e| e.province == region).collect()
        } else {
            entries.iter().filter(|e| e.city == region).collect()
        };
        if matched.is_empty() {
            return Err(format_err!("no grid entries match region {:?}", region));
        }
        let shape = MultiPolygon(matched.into_iter().map(|e| e.polygon.clone()).collect());
        self.seed_grid_multi(&shape, precision, query).await
    }

    async fn seed_cells(&self, cells: HashSet<String>, query: &str) -> Result<usize> {
        let count = cells.len();
        for cell in cells {
            let b = geohash::bbox(&cell);
            let region = format!("{},{},{},{}", b.min_lat, b.min_lon, b.max_lat, b.max_lon);
            self.push_task(&region, query).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore(Mutex<VecDeque<String>>);

    #[async_trait]
    impl CoordinationStore for FakeStore {
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn sample_credential(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn remove_credential(&self, _credential: &str) -> Result<()> {
            Ok(())
        }
        async fn credential_count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn reset_credentials(&self, _credentials: &[String]) -> Result<()> {
            Ok(())
        }
        async fn list_credentials(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn push_task(&self, task: &str) -> Result<()> {
            self.0.lock().unwrap().push_back(task.to_owned());
            Ok(())
        }
        async fn pop_task(&self) -> Result<Option<String>> {
            Ok(self.0.lock().unwrap().pop_front())
        }
        async fn requeue_task_head(&self, _task: &str) -> Result<()> {
            Ok(())
        }
        async fn task_count(&self) -> Result<u64> {
            Ok(self.0.lock().unwrap().len() as u64)
        }
        async fn is_visited(&self, _uid: &str) -> Result<bool> {
            Ok(false)
        }
        async fn mark_visited(&self, _uid: &str) -> Result<bool> {
            Ok(true)
        }
        async fn visited_count(&self) -> Result<u64> {
            Ok(0)
        }
        async fn replace_visited(&self, _uids: &[String]) -> Result<()> {
            Ok(())
        }
        async fn push_result(&self, _record: &str) -> Result<()> {
            Ok(())
        }
        async fn pop_result(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn result_count(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn city_mode_pushes_one_task_per_city() {
        let store = Arc::new(FakeStore::default());
        let seeder = TaskSeeder::new(store.clone());
        let cities = vec!["北京市".to_owned(), "上海市".to_owned()];
        let n = seeder.seed_cities(&cities, "美食").await.unwrap();
        assert_eq!(n, 2);
        let tasks: Vec<_> = store.0.lock().unwrap().iter().cloned().collect();
        assert_eq!(tasks, vec!["北京市#美食".to_owned(), "上海市#美食".to_owned()]);
    }

    #[tokio::test]
    async fn grid_mode_seeds_one_task_per_geohash_cell() {
        let store = Arc::new(FakeStore::default());
        let seeder = TaskSeeder::new(store.clone());
        let square = Polygon::new(
            geo::LineString::from(vec![
                (116.30, 39.80),
                (116.50, 39.80),
                (116.50, 39.95),
                (116.30, 39.95),
                (116.30, 39.80),
            ]),
            vec![],
        );
        let n = seeder.seed_grid(&square, 5, "美食").await.unwrap();
        assert!(n > 0);
        assert_eq!(store.0.lock().unwrap().len(), n);
        for task in store.0.lock().unwrap().iter() {
            assert!(task.ends_with("#美食"));
            let region = task.split('#').next().unwrap();
            assert_eq!(region.split(',').count(), 4);
        }
    }

    fn square_at(lon: f64, lat: f64) -> Polygon<f64> {
        Polygon::new(
            geo::LineString::from(vec![
                (lon, lat),
                (lon + 0.1, lat),
                (lon + 0.1, lat + 0.1),
                (lon, lat + 0.1),
                (lon, lat),
            ]),
            vec![],
        )
    }

    fn sample_entries() -> Vec<GridCityEntry> {
        vec![
            GridCityEntry {
                province: "北京".to_owned(),
                city: "东城区".to_owned(),
                polygon: square_at(116.3, 39.8),
            },
            GridCityEntry {
                province: "北京".to_owned(),
                city: "西城区".to_owned(),
                polygon: square_at(116.5, 39.9),
            },
            GridCityEntry {
                province: "上海".to_owned(),
                city: "浦东新区".to_owned(),
                polygon: square_at(121.3, 31.2),
            },
        ]
    }

    #[tokio::test]
    async fn seed_grid_region_by_city_name_only_seeds_that_city() {
        let store = Arc::new(FakeStore::default());
        let seeder = TaskSeeder::new(store.clone());
        let n = seeder
            .seed_grid_region(&sample_entries(), "东城区", 5, "美食")
            .await
            .unwrap();
        assert!(n > 0);
        assert_eq!(store.0.lock().unwrap().len(), n);
    }

    #[tokio::test]
    async fn seed_grid_region_by_province_seeds_every_city_in_it() {
        let store = Arc::new(FakeStore::default());
        let seeder = TaskSeeder::new(store.clone());
        let by_province = seeder
            .seed_grid_region(&sample_entries(), "北京", 5, "美食")
            .await
            .unwrap();

        let store_single = Arc::new(FakeStore::default());
        let seeder_single = TaskSeeder::new(store_single.clone());
        let by_city = seeder_single
            .seed_grid_region(&sample_entries(), "东城区", 5, "美食")
            .await
            .unwrap();
        assert!(by_province >= by_city);
    }

    #[tokio::test]
    async fn seed_grid_region_nationwide_seeds_every_entry() {
        let store = Arc::new(FakeStore::default());
        let seeder = TaskSeeder::new(store.clone());
        let n = seeder.seed_grid_region(&sample_entries(), "*", 5, "美食").await.unwrap();
        assert!(n > 0);
    }

    #[tokio::test]
    async fn seed_grid_region_missing_region_is_an_error() {
        let store = Arc::new(FakeStore::default());
        let seeder = TaskSeeder::new(store);
        assert!(seeder
            .seed_grid_region(&sample_entries(), "不存在", 5, "美食")
            .await
            .is_err());
    }
}

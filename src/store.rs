//! Detection result stores.
//!
//! A store owns the canonical, insertion-ordered detection set for a scan.
//! Insertion order is frame-scan order; the set is deduplicated on the
//! (frame_index, category, bbox) key, so a backend reporting multiple
//! disjoint boxes for one category in one frame keeps them all while exact
//! repeats (idempotent re-runs) collapse.
//!
//! Only the pipeline thread mutates a store during a run; readers take
//! snapshots rather than holding locks. `SqliteDetectionStore` is the durable
//! variant: detections appended before a crash remain a consistent prefix.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};

use crate::telemetry::TelemetryFix;
use crate::{BoundingBox, Category, Detection};

pub trait DetectionStore: Send {
    /// Append a detection. Returns false when the dedup key already exists.
    fn append(&mut self, detection: &Detection) -> Result<bool>;

    /// Copy of the full detection set in insertion order.
    fn snapshot(&self) -> Result<Vec<Detection>>;

    fn len(&self) -> Result<usize>;

    /// Drop the whole set. There is no partial delete.
    fn clear(&mut self) -> Result<()>;
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryDetectionStore {
    rows: Vec<Detection>,
    keys: HashSet<(u32, Category, String)>,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn append(&mut self, detection: &Detection) -> Result<bool> {
        if !self.keys.insert(detection.dedup_key()) {
            return Ok(false);
        }
        self.rows.push(detection.clone());
        Ok(true)
    }

    fn snapshot(&self) -> Result<Vec<Detection>> {
        Ok(self.rows.clone())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.rows.len())
    }

    fn clear(&mut self) -> Result<()> {
        self.rows.clear();
        self.keys.clear();
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Sqlite store
// ----------------------------------------------------------------------------

pub struct SqliteDetectionStore {
    conn: Connection,
}

impl SqliteDetectionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              frame_index INTEGER NOT NULL,
              category TEXT NOT NULL,
              confidence REAL NOT NULL,
              bbox TEXT NOT NULL DEFAULT '',
              fix_offset_ms INTEGER,
              latitude REAL,
              longitude REAL,
              altitude REAL,
              image_path TEXT NOT NULL,
              detail TEXT,
              UNIQUE(frame_index, category, bbox)
            );

            CREATE INDEX IF NOT EXISTS idx_detections_frame
              ON detections(frame_index);
            "#,
        )?;
        Ok(())
    }

    fn detection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            frame_index: row.get(0)?,
            category: row.get(1)?,
            confidence: row.get(2)?,
            bbox: row.get(3)?,
            fix_offset_ms: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            altitude: row.get(7)?,
            image_path: row.get(8)?,
            detail: row.get(9)?,
        })
    }
}

struct RawRow {
    frame_index: u32,
    category: String,
    confidence: f64,
    bbox: String,
    fix_offset_ms: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    image_path: String,
    detail: Option<String>,
}

impl RawRow {
    fn into_detection(self) -> Result<Detection> {
        let category = Category::from_label(&self.category)
            .ok_or_else(|| anyhow!("corrupt detections row: unknown category '{}'", self.category))?;
        let bbox = if self.bbox.is_empty() {
            None
        } else {
            Some(
                BoundingBox::from_field(&self.bbox)
                    .ok_or_else(|| anyhow!("corrupt detections row: bad bbox '{}'", self.bbox))?,
            )
        };
        let location = match (self.fix_offset_ms, self.latitude, self.longitude) {
            (Some(offset_ms), Some(latitude), Some(longitude)) => Some(TelemetryFix {
                offset: Duration::from_millis(offset_ms.max(0) as u64),
                latitude,
                longitude,
                altitude: self.altitude,
            }),
            _ => None,
        };
        Ok(Detection {
            category,
            confidence: self.confidence as f32,
            bbox,
            location,
            source_frame_index: self.frame_index,
            image_path: self.image_path,
            detail: self.detail,
        })
    }
}

impl DetectionStore for SqliteDetectionStore {
    fn append(&mut self, detection: &Detection) -> Result<bool> {
        let bbox = detection.bbox.map(|b| b.to_field()).unwrap_or_default();
        let (fix_offset_ms, latitude, longitude, altitude) = match detection.location {
            Some(fix) => (
                Some(fix.offset.as_millis() as i64),
                Some(fix.latitude),
                Some(fix.longitude),
                fix.altitude,
            ),
            None => (None, None, None, None),
        };

        let changed = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO detections(
                frame_index, category, confidence, bbox,
                fix_offset_ms, latitude, longitude, altitude,
                image_path, detail
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                detection.source_frame_index,
                detection.category.label(),
                detection.confidence as f64,
                bbox,
                fix_offset_ms,
                latitude,
                longitude,
                altitude,
                detection.image_path,
                detection.detail,
            ],
        )?;
        Ok(changed > 0)
    }

    fn snapshot(&self) -> Result<Vec<Detection>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT frame_index, category, confidence, bbox,
                   fix_offset_ms, latitude, longitude, altitude,
                   image_path, detail
            FROM detections ORDER BY id ASC
            "#,
        )?;
        let rows = stmt.query_map([], Self::detection_from_row)?;
        let mut detections = Vec::new();
        for row in rows {
            detections.push(row?.into_detection()?);
        }
        Ok(detections)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM detections", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(frame: u32, category: Category, bbox: Option<BoundingBox>) -> Detection {
        Detection {
            category,
            confidence: 0.9,
            bbox,
            location: Some(TelemetryFix {
                offset: Duration::from_secs(frame as u64),
                latitude: 48.0 + frame as f64 * 0.001,
                longitude: 2.0,
                altitude: Some(80.0),
            }),
            source_frame_index: frame,
            image_path: format!("out/frame_{:05}.jpg", frame),
            detail: Some("finding".to_string()),
        }
    }

    fn exercise_store(store: &mut dyn DetectionStore) {
        let bbox_a = BoundingBox {
            x1: 0,
            y1: 0,
            x2: 10,
            y2: 10,
        };
        let bbox_b = BoundingBox {
            x1: 50,
            y1: 50,
            x2: 90,
            y2: 90,
        };

        assert!(store.append(&detection(1, Category::Weed, Some(bbox_a))).unwrap());
        // Same key is ignored.
        assert!(!store.append(&detection(1, Category::Weed, Some(bbox_a))).unwrap());
        // Disjoint box for the same (frame, category) is retained.
        assert!(store.append(&detection(1, Category::Weed, Some(bbox_b))).unwrap());
        assert!(store.append(&detection(0, Category::Animal, None)).unwrap());
        assert_eq!(store.len().unwrap(), 3);

        // Insertion order, not frame order.
        let rows = store.snapshot().unwrap();
        assert_eq!(rows[0].source_frame_index, 1);
        assert_eq!(rows[2].source_frame_index, 0);
        assert_eq!(rows[0].location.unwrap().latitude, 48.001);

        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
        // Cleared keys are insertable again.
        assert!(store.append(&detection(1, Category::Weed, Some(bbox_a))).unwrap());
    }

    #[test]
    fn in_memory_store_behavior() {
        let mut store = InMemoryDetectionStore::new();
        exercise_store(&mut store);
    }

    #[test]
    fn sqlite_store_behavior() {
        let mut store = SqliteDetectionStore::open_in_memory().unwrap();
        exercise_store(&mut store);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("detections.db");
        let db_path = db_path.to_str().unwrap();

        {
            let mut store = SqliteDetectionStore::open(db_path).unwrap();
            store.append(&detection(3, Category::BareSpot, None)).unwrap();
        }
        let store = SqliteDetectionStore::open(db_path).unwrap();
        let rows = store.snapshot().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_frame_index, 3);
        assert_eq!(rows[0].category, Category::BareSpot);
        assert_eq!(rows[0].detail.as_deref(), Some("finding"));
    }
}

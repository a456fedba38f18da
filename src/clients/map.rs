use log::{debug, info, warn};

use crate::clients::entities::{Annotation, Coordinate, ScreenPoint, TrackResult};

/// Title given to pins dropped while no track is selected.
pub const PLACEHOLDER_TITLE: &str = "Dropped Pin";

/// Size of the visible map area in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl Default for Span {
    fn default() -> Self {
        Span {
            latitude_delta: 0.05,
            longitude_delta: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub center: Coordinate,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationAuthorization {
    NotDetermined,
    Denied,
    Authorized,
}

/// Updates delivered by the platform location service.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationEvent {
    AuthorizationChanged(LocationAuthorization),
    Updated(Vec<Coordinate>),
    Failed(String),
}

/// Converts points on the map view into coordinates for a given region.
pub trait MapProjection {
    fn coordinate_at(&self, point: ScreenPoint, region: &Region) -> Option<Coordinate>;
}

/// The platform map view the coordinator draws into.
pub trait MapSurface {
    fn set_region(&mut self, region: &Region);
    fn add_annotations(&mut self, annotations: &[Annotation]);
    fn remove_all_annotations(&mut self);
}

/// Flat projection of a region onto a view of `width` x `height` points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Viewport { width, height }
    }
}

impl MapProjection for Viewport {
    fn coordinate_at(&self, point: ScreenPoint, region: &Region) -> Option<Coordinate> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        if !(0.0..=self.width).contains(&point.x) || !(0.0..=self.height).contains(&point.y) {
            return None;
        }
        // screen y grows downwards, latitude grows upwards
        let dx = point.x / self.width - 0.5;
        let dy = point.y / self.height - 0.5;
        let coordinate = Coordinate::new(
            region.center.latitude - dy * region.span.latitude_delta,
            region.center.longitude + dx * region.span.longitude_delta,
        );
        coordinate.is_valid().then_some(coordinate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapConfig {
    pub initial_center: Coordinate,
    pub span: Span,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            // Stockholm
            initial_center: Coordinate::new(59.3293, 18.0686),
            span: Span::default(),
        }
    }
}

/// Mirrors the device location into the map region and keeps the dropped pins.
pub struct MapCoordinator {
    projection: Box<dyn MapProjection + Send>,
    region: Region,
    annotations: Vec<Annotation>,
    authorization: LocationAuthorization,
    rendered: usize,
    region_dirty: bool,
    surface_stale: bool,
}

impl MapCoordinator {
    pub fn new(projection: impl MapProjection + Send + 'static, config: MapConfig) -> Self {
        MapCoordinator {
            projection: Box::new(projection),
            region: Region {
                center: config.initial_center,
                span: config.span,
            },
            annotations: Vec::new(),
            authorization: LocationAuthorization::NotDetermined,
            rendered: 0,
            region_dirty: true,
            surface_stale: false,
        }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn authorization(&self) -> LocationAuthorization {
        self.authorization
    }

    pub fn needs_permission_request(&self) -> bool {
        self.authorization == LocationAuthorization::NotDetermined
    }

    pub fn on_location_event(&mut self, event: LocationEvent) {
        match event {
            LocationEvent::AuthorizationChanged(status) => {
                info!("Location authorization changed to {status:?}");
                self.authorization = status;
            }
            LocationEvent::Updated(locations) => {
                let Some(latest) = locations.into_iter().rev().find(Coordinate::is_valid) else {
                    debug!("Location update without a valid coordinate");
                    return;
                };
                if latest != self.region.center {
                    debug!("Recentering map on {latest}");
                    self.region.center = latest;
                    self.region_dirty = true;
                }
            }
            LocationEvent::Failed(reason) => warn!("Location update failed: {reason}"),
        }
    }

    /// Drops a pin at `point`, labelled from `selected` when a track is selected.
    pub fn on_long_press(
        &mut self,
        point: ScreenPoint,
        selected: Option<&TrackResult>,
    ) -> Option<&Annotation> {
        let Some(coordinate) = self.projection.coordinate_at(point, &self.region) else {
            debug!("Long press at {point:?} is outside the map");
            return None;
        };

        let annotation = match selected {
            Some(track) => Annotation {
                coordinate,
                title: track.name.clone(),
                subtitle: Some(track.artist.clone()),
            },
            None => Annotation {
                coordinate,
                title: PLACEHOLDER_TITLE.to_owned(),
                subtitle: None,
            },
        };
        info!("Dropped pin {:?} at {coordinate}", annotation.title);
        self.annotations.push(annotation);
        self.annotations.last()
    }

    /// Forces the next render to redraw every annotation, e.g. after the map view was recreated.
    pub fn invalidate_surface(&mut self) {
        self.surface_stale = true;
        self.region_dirty = true;
    }

    /// Pushes pending region and annotation changes into `surface`.
    pub fn render(&mut self, surface: &mut dyn MapSurface) {
        if self.region_dirty {
            surface.set_region(&self.region);
            self.region_dirty = false;
        }
        if self.surface_stale {
            surface.remove_all_annotations();
            self.rendered = 0;
            self.surface_stale = false;
        }
        // annotations are append-only, so only the tail is new
        if self.rendered < self.annotations.len() {
            surface.add_annotations(&self.annotations[self.rendered..]);
            self.rendered = self.annotations.len();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub regions: Vec<Region>,
        pub shown: Vec<Annotation>,
        pub add_calls: usize,
        pub clears: usize,
    }

    impl MapSurface for RecordingSurface {
        fn set_region(&mut self, region: &Region) {
            self.regions.push(*region);
        }

        fn add_annotations(&mut self, annotations: &[Annotation]) {
            self.add_calls += 1;
            self.shown.extend_from_slice(annotations);
        }

        fn remove_all_annotations(&mut self) {
            self.clears += 1;
            self.shown.clear();
        }
    }

    fn coordinator() -> MapCoordinator {
        let config = MapConfig {
            initial_center: Coordinate::new(10.0, 20.0),
            span: Span {
                latitude_delta: 1.0,
                longitude_delta: 2.0,
            },
        };
        MapCoordinator::new(Viewport::new(100.0, 200.0), config)
    }

    fn track() -> TrackResult {
        TrackResult {
            name: "So What".to_owned(),
            artist: "Miles Davis".to_owned(),
            image_url: None,
        }
    }

    #[test]
    fn viewport_maps_center_and_corners() {
        let map = coordinator();
        let region = *map.region();
        let viewport = Viewport::new(100.0, 200.0);

        assert_eq!(
            viewport.coordinate_at(ScreenPoint::new(50.0, 100.0), &region),
            Some(Coordinate::new(10.0, 20.0))
        );
        assert_eq!(
            viewport.coordinate_at(ScreenPoint::new(0.0, 0.0), &region),
            Some(Coordinate::new(10.5, 19.0))
        );
        assert_eq!(
            viewport.coordinate_at(ScreenPoint::new(100.0, 200.0), &region),
            Some(Coordinate::new(9.5, 21.0))
        );
        assert!(viewport.coordinate_at(ScreenPoint::new(-1.0, 0.0), &region).is_none());
        assert!(Viewport::new(0.0, 0.0).coordinate_at(ScreenPoint::new(0.0, 0.0), &region).is_none());
    }

    #[test]
    fn long_press_with_selected_track_uses_its_labels() {
        let mut map = coordinator();
        let selected = track();
        let pin = map
            .on_long_press(ScreenPoint::new(50.0, 100.0), Some(&selected))
            .cloned()
            .unwrap();
        assert_eq!(pin.title, "So What");
        assert_eq!(pin.subtitle.as_deref(), Some("Miles Davis"));
        assert_eq!(pin.coordinate, Coordinate::new(10.0, 20.0));
    }

    #[test]
    fn long_press_without_selection_uses_placeholder() {
        let mut map = coordinator();
        let pin = map.on_long_press(ScreenPoint::new(10.0, 10.0), None).cloned().unwrap();
        assert_eq!(pin.title, PLACEHOLDER_TITLE);
        assert!(pin.subtitle.is_none());
        assert_eq!(map.annotations().len(), 1);
    }

    #[test]
    fn long_press_outside_view_adds_nothing() {
        let mut map = coordinator();
        assert!(map.on_long_press(ScreenPoint::new(500.0, 10.0), None).is_none());
        assert!(map.annotations().is_empty());
    }

    #[test]
    fn location_updates_recenter_on_latest_valid_fix() {
        let mut map = coordinator();
        assert!(map.needs_permission_request());
        map.on_location_event(LocationEvent::AuthorizationChanged(
            LocationAuthorization::Authorized,
        ));
        assert!(!map.needs_permission_request());

        map.on_location_event(LocationEvent::Updated(vec![
            Coordinate::new(1.0, 1.0),
            Coordinate::new(2.0, 2.0),
            Coordinate::new(f64::NAN, 0.0),
        ]));
        assert_eq!(map.region().center, Coordinate::new(2.0, 2.0));
        assert_eq!(map.region().span.longitude_delta, 2.0);

        map.on_location_event(LocationEvent::Failed("no fix".into()));
        map.on_location_event(LocationEvent::Updated(vec![]));
        assert_eq!(map.region().center, Coordinate::new(2.0, 2.0));
    }

    #[test]
    fn render_only_adds_new_annotations() {
        let mut map = coordinator();
        let mut surface = RecordingSurface::default();

        map.render(&mut surface);
        assert_eq!(surface.regions.len(), 1);
        assert_eq!(surface.add_calls, 0);

        map.on_long_press(ScreenPoint::new(10.0, 10.0), None);
        map.on_long_press(ScreenPoint::new(20.0, 20.0), None);
        map.render(&mut surface);
        map.render(&mut surface);
        assert_eq!(surface.add_calls, 1);
        assert_eq!(surface.shown.len(), 2);
        assert_eq!(surface.regions.len(), 1);

        let selected = track();
        map.on_long_press(ScreenPoint::new(30.0, 30.0), Some(&selected));
        map.render(&mut surface);
        assert_eq!(surface.shown.len(), 3);
        assert_eq!(surface.shown[2].title, "So What");
        assert_eq!(surface.clears, 0);
    }

    #[test]
    fn invalidated_surface_gets_full_redraw() {
        let mut map = coordinator();
        let mut surface = RecordingSurface::default();
        map.on_long_press(ScreenPoint::new(10.0, 10.0), None);
        map.render(&mut surface);

        map.invalidate_surface();
        map.render(&mut surface);
        assert_eq!(surface.clears, 1);
        assert_eq!(surface.shown.len(), 1);
        assert_eq!(surface.regions.len(), 2);
    }
}

//! HTTP server layer for WSI Streamer.
//!
//! This module provides the HTTP API for serving tiles from Whole Slide Images.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │         GET /tiles/{slide_id}/{level}/{x}/{y}.jpg               │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │  handlers   │  │    auth     │  │        routes           │  │
//! │  │ (requests)  │  │ (signed URL)│  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A second, independent surface (`pyramid_registry`, `iiif`) serves tiles
//! and IIIF Image/Presentation API descriptors directly out of DICOM
//! series directories rather than the S3-backed `AppState<S>` above; see
//! `routes::build_iiif_router`.

pub mod auth;
pub mod handlers;
pub mod iiif;
pub mod pyramid_registry;
pub mod routes;

pub use auth::{auth_middleware, AuthError, AuthQueryParams, OptionalAuth, SignedUrlAuth};
pub use handlers::{
    health_handler, slides_handler, tile_handler, AppState, ErrorResponse, HealthResponse,
    SlidesQueryParams, SlidesResponse, TilePathParams, TileQueryParams,
};
pub use iiif::{IiifError, IiifState};
pub use pyramid_registry::PyramidRegistry;
pub use routes::{
    build_iiif_router, create_dev_router, create_production_router, create_router, RouterConfig,
};

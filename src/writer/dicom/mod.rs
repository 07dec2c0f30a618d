//! Writes tiles into one or more VL Whole Slide Microscopy Image Storage
//! instances per pyramid level, handed off to a [`DicomInstanceSink`] once
//! each level is flushed.
//!
//! Mirrors `pyramid::DicomPyramidSource` in reverse: the same tag constants,
//! the same `TotalPixelMatrixColumns`/`InConcatenationNumber` grouping
//! scheme, the same transfer-syntax-to-compression mapping. A level whose
//! encoded frames would exceed `max_size` is split across multiple
//! concatenation parts the way a single real acquisition's frames already
//! are when `DicomPyramidSource` reads them back.

mod sink;
mod uid;

pub use sink::{DicomInstanceSink, FolderSink, OrthancSink, OrthancSinkConfig};
pub use uid::generate_uid;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use dicom_core::value::{DataSetSequence, PixelFragmentSequence, Value};
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;
use dicom_object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};

use crate::color::{rgb_to_dicom_lab, Rgb8};
use crate::config::OpticalPathTemplate;
use crate::error::PyramidError;
use crate::pixel::{Compression, Image, PhotometricInterpretation, PixelFormat};
use crate::pyramid::ImagedVolumeParameters;

use super::{transcode_if_needed, LevelTracker, PyramidWriter};

const TAG_SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
const TAG_SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
const TAG_STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
const TAG_SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
const TAG_MODALITY: Tag = Tag(0x0008, 0x0060);
const TAG_IMAGE_TYPE: Tag = Tag(0x0008, 0x0008);
const TAG_ROWS: Tag = Tag(0x0028, 0x0010);
const TAG_COLUMNS: Tag = Tag(0x0028, 0x0011);
const TAG_BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
const TAG_BITS_STORED: Tag = Tag(0x0028, 0x0101);
const TAG_HIGH_BIT: Tag = Tag(0x0028, 0x0102);
const TAG_PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
const TAG_SAMPLES_PER_PIXEL: Tag = Tag(0x0028, 0x0002);
const TAG_PHOTOMETRIC_INTERPRETATION: Tag = Tag(0x0028, 0x0004);
const TAG_PLANAR_CONFIGURATION: Tag = Tag(0x0028, 0x0006);
const TAG_NUMBER_OF_FRAMES: Tag = Tag(0x0028, 0x0008);
const TAG_TOTAL_PIXEL_MATRIX_COLUMNS: Tag = Tag(0x0048, 0x0006);
const TAG_TOTAL_PIXEL_MATRIX_ROWS: Tag = Tag(0x0048, 0x0007);
const TAG_CONCATENATION_UID: Tag = Tag(0x0020, 0x9161);
const TAG_IN_CONCATENATION_NUMBER: Tag = Tag(0x0020, 0x9162);
const TAG_SOP_INSTANCE_UID_OF_CONCATENATION_SOURCE: Tag = Tag(0x0020, 0x0242);
const TAG_CONCATENATION_FRAME_OFFSET_NUMBER: Tag = Tag(0x0020, 0x9228);
const TAG_PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);
const TAG_PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE: Tag = Tag(0x5200, 0x9230);
const TAG_PLANE_POSITION_SLIDE_SEQUENCE: Tag = Tag(0x0048, 0x021A);
const TAG_COLUMN_POSITION_IN_TOTAL_IMAGE_PIXEL_MATRIX: Tag = Tag(0x0048, 0x021E);
const TAG_ROW_POSITION_IN_TOTAL_IMAGE_PIXEL_MATRIX: Tag = Tag(0x0048, 0x021F);
const TAG_OPTICAL_PATH_SEQUENCE: Tag = Tag(0x0048, 0x0105);
const TAG_OPTICAL_PATH_IDENTIFIER: Tag = Tag(0x0048, 0x0106);
const TAG_ICC_PROFILE: Tag = Tag(0x0028, 0x2000);
const TAG_IMAGED_VOLUME_WIDTH: Tag = Tag(0x0048, 0x0001);
const TAG_IMAGED_VOLUME_HEIGHT: Tag = Tag(0x0048, 0x0002);
const TAG_IMAGED_VOLUME_DEPTH: Tag = Tag(0x0048, 0x0003);
const TAG_IMAGE_ORIENTATION_SLIDE: Tag = Tag(0x0048, 0x0102);
const TAG_TOTAL_PIXEL_MATRIX_ORIGIN_SEQUENCE: Tag = Tag(0x0048, 0x0010);
const TAG_X_OFFSET_IN_SLIDE_COORDINATE_SYSTEM: Tag = Tag(0x0040, 0x072A);
const TAG_Y_OFFSET_IN_SLIDE_COORDINATE_SYSTEM: Tag = Tag(0x0040, 0x073A);
const TAG_Z_OFFSET_IN_SLIDE_COORDINATE_SYSTEM: Tag = Tag(0x0040, 0x074A);
const TAG_DIMENSION_ORGANIZATION_SEQUENCE: Tag = Tag(0x0020, 0x9221);
const TAG_DIMENSION_ORGANIZATION_UID: Tag = Tag(0x0020, 0x9164);
const TAG_DIMENSION_INDEX_SEQUENCE: Tag = Tag(0x0020, 0x9222);
const TAG_DIMENSION_INDEX_POINTER: Tag = Tag(0x0020, 0x9165);
const TAG_FUNCTIONAL_GROUP_POINTER: Tag = Tag(0x0020, 0x9167);
const TAG_DIMENSION_INDEX_VALUES: Tag = Tag(0x0020, 0x9157);
const TAG_RECOMMENDED_ABSENT_PIXEL_CIELAB_VALUE: Tag = Tag(0x0048, 0x0015);

/// Default row/column direction cosines for `ImageOrientationSlide`: the
/// pixel matrix row axis runs along slide -Y, the column axis along slide
/// +X, the standard orientation assumed for a slide scanned without a
/// per-instance orientation override.
const DEFAULT_IMAGE_ORIENTATION_SLIDE: &str = "0\\-1\\0\\1\\0\\0";

const SOP_CLASS_VL_WHOLE_SLIDE_MICROSCOPY_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.77.1.6";

/// 1 GiB: a single DICOM instance holding more than this much frame payload
/// is refused rather than silently produced, since several PACS/viewers
/// struggle with very large single files regardless of what `max_size` the
/// caller configured.
const MAX_INSTANCE_PIXEL_BYTES: u64 = 1024 * 1024 * 1024;

fn transfer_syntax_for(compression: Compression) -> Result<&'static str, PyramidError> {
    match compression {
        Compression::Jpeg => Ok("1.2.840.10008.1.2.4.50"),
        Compression::Jpeg2000 => Ok("1.2.840.10008.1.2.4.90"),
        Compression::JpegLs => Ok("1.2.840.10008.1.2.4.80"),
        Compression::None => Ok("1.2.840.10008.1.2.1"),
        other => Err(PyramidError::NotImplemented(format!(
            "{:?} has no DICOM transfer syntax mapping",
            other
        ))),
    }
}

struct LevelBuffer {
    width: u32,
    height: u32,
    tiles_x: u32,
    tiles_y: u32,
    frames: HashMap<(u32, u32), Bytes>,
}

impl LevelBuffer {
    fn new(width: u32, height: u32, tiles_x: u32, tiles_y: u32) -> Self {
        LevelBuffer { width, height, tiles_x, tiles_y, frames: HashMap::new() }
    }

    fn total_tiles(&self) -> usize {
        (self.tiles_x * self.tiles_y) as usize
    }
}

/// Configuration for the study/series this writer's instances all belong to,
/// plus the optional optical path and ICC profile every instance carries.
pub struct DicomWriterConfig {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub max_size: u64,
    pub optical_path: OpticalPathTemplate,
    pub icc_profile: Option<Vec<u8>>,
    pub imaged_volume: ImagedVolumeParameters,
    pub background_color: Option<Rgb8>,
}

pub struct DicomPyramidWriter {
    tracker: LevelTracker,
    pixel_format: PixelFormat,
    photometric: PhotometricInterpretation,
    compression: Compression,
    quality: u8,
    config: DicomWriterConfig,
    sink: Box<dyn DicomInstanceSink>,
    levels: Vec<LevelBuffer>,
    flushed: bool,
    dimension_organization_uid: String,
}

impl DicomPyramidWriter {
    pub fn new(
        tile_width: u32,
        tile_height: u32,
        pixel_format: PixelFormat,
        photometric: PhotometricInterpretation,
        compression: Compression,
        quality: u8,
        config: DicomWriterConfig,
        sink: Box<dyn DicomInstanceSink>,
    ) -> Self {
        DicomPyramidWriter {
            tracker: LevelTracker::new(tile_width, tile_height),
            pixel_format,
            photometric,
            compression,
            quality: quality.clamp(1, 100),
            config,
            sink,
            levels: Vec::new(),
            flushed: false,
            dimension_organization_uid: generate_uid(),
        }
    }

    fn samples_per_pixel(&self) -> u16 {
        match self.pixel_format {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
        }
    }

    async fn flush_level(&mut self, level_z: u32) -> Result<(), PyramidError> {
        let level = &self.levels[level_z as usize];
        let total = level.total_tiles();
        if level.frames.len() != total {
            return Err(PyramidError::BadSequenceOfCalls(format!(
                "level {} is missing tiles: {}/{} written",
                level_z,
                level.frames.len(),
                total
            )));
        }

        let mut ordered: Vec<((u32, u32), Bytes)> = level.frames.iter().map(|(k, v)| (*k, v.clone())).collect();
        ordered.sort_by_key(|((tx, ty), _)| *ty as u64 * level.tiles_x as u64 + *tx as u64);

        let chunks = split_into_instances(&ordered, self.config.max_size)?;
        let needs_concatenation = chunks.len() > 1;
        let concatenation_uid = if needs_concatenation { Some(generate_uid()) } else { None };

        let mut source_sop_instance_uid: Option<String> = None;
        let mut frame_offset: u32 = 0;

        for (part_index, chunk) in chunks.iter().enumerate() {
            let sop_instance_uid = generate_uid();
            if part_index == 0 {
                source_sop_instance_uid = Some(sop_instance_uid.clone());
            }

            let bytes = build_instance(
                chunk,
                level.width,
                level.height,
                self.tracker.tile_width(),
                self.tracker.tile_height(),
                self.samples_per_pixel(),
                self.photometric,
                self.compression,
                &sop_instance_uid,
                &self.config.study_instance_uid,
                &self.config.series_instance_uid,
                concatenation_uid.as_deref(),
                source_sop_instance_uid.as_deref(),
                if needs_concatenation { Some((part_index as u32 + 1, frame_offset)) } else { None },
                self.config.optical_path,
                self.config.icc_profile.as_deref(),
                &self.config.imaged_volume,
                self.config.background_color,
                &self.dimension_organization_uid,
            )?;

            self.sink.write_instance(bytes).await?;
            frame_offset += chunk.len() as u32;
        }

        Ok(())
    }
}

/// Splits a level's ordered frames into instance-sized chunks, each bounded
/// by `max_size` (0 = unlimited) and by the hard [`MAX_INSTANCE_PIXEL_BYTES`]
/// safety clamp regardless of what `max_size` requests.
fn split_into_instances(
    ordered: &[((u32, u32), Bytes)],
    max_size: u64,
) -> Result<Vec<&[((u32, u32), Bytes)]>, PyramidError> {
    let limit = if max_size == 0 { MAX_INSTANCE_PIXEL_BYTES } else { max_size.min(MAX_INSTANCE_PIXEL_BYTES) };

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut running = 0u64;

    for (i, (_, bytes)) in ordered.iter().enumerate() {
        let len = bytes.len() as u64;
        if len > limit {
            return Err(PyramidError::NotEnoughMemory(format!(
                "a single frame is {} bytes, exceeding the {} byte instance limit",
                len, limit
            )));
        }
        if running + len > limit && i > start {
            chunks.push(&ordered[start..i]);
            start = i;
            running = 0;
        }
        running += len;
    }
    if start < ordered.len() {
        chunks.push(&ordered[start..]);
    }
    if chunks.is_empty() {
        chunks.push(&ordered[0..0]);
    }
    Ok(chunks)
}

#[allow(clippy::too_many_arguments)]
fn build_instance(
    chunk: &[((u32, u32), Bytes)],
    total_width: u32,
    total_height: u32,
    tile_width: u32,
    tile_height: u32,
    samples_per_pixel: u16,
    photometric: PhotometricInterpretation,
    compression: Compression,
    sop_instance_uid: &str,
    study_instance_uid: &str,
    series_instance_uid: &str,
    concatenation_uid: Option<&str>,
    concatenation_source_sop_instance_uid: Option<&str>,
    concatenation_part: Option<(u32, u32)>,
    optical_path: OpticalPathTemplate,
    icc_profile: Option<&[u8]>,
    imaged_volume: &ImagedVolumeParameters,
    background_color: Option<Rgb8>,
    dimension_organization_uid: &str,
) -> Result<Vec<u8>, PyramidError> {
    let mut dataset = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);

    dataset.put(DataElement::new(
        TAG_SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(SOP_CLASS_VL_WHOLE_SLIDE_MICROSCOPY_IMAGE_STORAGE),
    ));
    dataset.put(DataElement::new(TAG_SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_instance_uid)));
    dataset.put(DataElement::new(TAG_STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_instance_uid)));
    dataset.put(DataElement::new(TAG_SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_instance_uid)));
    dataset.put(DataElement::new(TAG_MODALITY, VR::CS, PrimitiveValue::from("SM")));
    dataset.put(DataElement::new(
        TAG_IMAGE_TYPE,
        VR::CS,
        PrimitiveValue::from("ORIGINAL\\PRIMARY\\VOLUME\\NONE"),
    ));

    dataset.put(DataElement::new(TAG_ROWS, VR::US, PrimitiveValue::from(tile_height as u16)));
    dataset.put(DataElement::new(TAG_COLUMNS, VR::US, PrimitiveValue::from(tile_width as u16)));
    dataset.put(DataElement::new(TAG_BITS_ALLOCATED, VR::US, PrimitiveValue::from(8u16)));
    dataset.put(DataElement::new(TAG_BITS_STORED, VR::US, PrimitiveValue::from(8u16)));
    dataset.put(DataElement::new(TAG_HIGH_BIT, VR::US, PrimitiveValue::from(7u16)));
    dataset.put(DataElement::new(TAG_PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0u16)));
    dataset.put(DataElement::new(TAG_SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(samples_per_pixel)));
    dataset.put(DataElement::new(
        TAG_PHOTOMETRIC_INTERPRETATION,
        VR::CS,
        PrimitiveValue::from(photometric.dicom_code()),
    ));
    if samples_per_pixel > 1 {
        dataset.put(DataElement::new(TAG_PLANAR_CONFIGURATION, VR::US, PrimitiveValue::from(0u16)));
    }
    dataset.put(DataElement::new(TAG_NUMBER_OF_FRAMES, VR::IS, PrimitiveValue::from(chunk.len().to_string())));
    dataset.put(DataElement::new(TAG_TOTAL_PIXEL_MATRIX_COLUMNS, VR::UL, PrimitiveValue::from(total_width)));
    dataset.put(DataElement::new(TAG_TOTAL_PIXEL_MATRIX_ROWS, VR::UL, PrimitiveValue::from(total_height)));
    dataset.put(DataElement::new(
        TAG_IMAGE_ORIENTATION_SLIDE,
        VR::DS,
        PrimitiveValue::from(DEFAULT_IMAGE_ORIENTATION_SLIDE),
    ));

    if let Some(width_mm) = imaged_volume.width_mm {
        dataset.put(DataElement::new(TAG_IMAGED_VOLUME_WIDTH, VR::FL, PrimitiveValue::from(width_mm as f32)));
    }
    if let Some(height_mm) = imaged_volume.height_mm {
        dataset.put(DataElement::new(TAG_IMAGED_VOLUME_HEIGHT, VR::FL, PrimitiveValue::from(height_mm as f32)));
    }
    if imaged_volume.depth_mm > 0.0 {
        dataset.put(DataElement::new(
            TAG_IMAGED_VOLUME_DEPTH,
            VR::FL,
            PrimitiveValue::from(imaged_volume.depth_mm as f32),
        ));
    }

    let mut origin = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    origin.put(DataElement::new(
        TAG_X_OFFSET_IN_SLIDE_COORDINATE_SYSTEM,
        VR::DS,
        PrimitiveValue::from(imaged_volume.offset_x_mm.to_string()),
    ));
    origin.put(DataElement::new(
        TAG_Y_OFFSET_IN_SLIDE_COORDINATE_SYSTEM,
        VR::DS,
        PrimitiveValue::from(imaged_volume.offset_y_mm.to_string()),
    ));
    dataset.put(sequence_element(TAG_TOTAL_PIXEL_MATRIX_ORIGIN_SEQUENCE, vec![origin]));

    let mut dimension_organization = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    dimension_organization.put(DataElement::new(
        TAG_DIMENSION_ORGANIZATION_UID,
        VR::UI,
        PrimitiveValue::from(dimension_organization_uid),
    ));
    dataset.put(sequence_element(TAG_DIMENSION_ORGANIZATION_SEQUENCE, vec![dimension_organization]));
    dataset.put(sequence_element(
        TAG_DIMENSION_INDEX_SEQUENCE,
        vec![
            dimension_index_item(TAG_COLUMN_POSITION_IN_TOTAL_IMAGE_PIXEL_MATRIX),
            dimension_index_item(TAG_ROW_POSITION_IN_TOTAL_IMAGE_PIXEL_MATRIX),
        ],
    ));

    if let Some(background_color) = background_color {
        let (l, a, b) = rgb_to_dicom_lab(background_color);
        dataset.put(DataElement::new(
            TAG_RECOMMENDED_ABSENT_PIXEL_CIELAB_VALUE,
            VR::US,
            PrimitiveValue::from(vec![l, a, b]),
        ));
    }

    if let Some(concatenation_uid) = concatenation_uid {
        dataset.put(DataElement::new(TAG_CONCATENATION_UID, VR::UI, PrimitiveValue::from(concatenation_uid)));
        if let Some(source) = concatenation_source_sop_instance_uid {
            dataset.put(DataElement::new(
                TAG_SOP_INSTANCE_UID_OF_CONCATENATION_SOURCE,
                VR::UI,
                PrimitiveValue::from(source),
            ));
        }
        if let Some((in_concatenation_number, frame_offset)) = concatenation_part {
            dataset.put(DataElement::new(
                TAG_IN_CONCATENATION_NUMBER,
                VR::US,
                PrimitiveValue::from(in_concatenation_number as u16),
            ));
            dataset.put(DataElement::new(
                TAG_CONCATENATION_FRAME_OFFSET_NUMBER,
                VR::UL,
                PrimitiveValue::from(frame_offset),
            ));
        }
    }

    let pixel_spacing_mm = imaged_volume.pixel_spacing_mm(total_width, total_height);

    let functional_groups: Vec<InMemDicomObject> = chunk
        .iter()
        .map(|((tile_x, tile_y), _)| {
            let column_position = tile_x * tile_width + 1;
            let row_position = tile_y * tile_height + 1;

            let mut plane_position = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
            plane_position.put(DataElement::new(
                TAG_COLUMN_POSITION_IN_TOTAL_IMAGE_PIXEL_MATRIX,
                VR::SL,
                PrimitiveValue::from(column_position as i32),
            ));
            plane_position.put(DataElement::new(
                TAG_ROW_POSITION_IN_TOTAL_IMAGE_PIXEL_MATRIX,
                VR::SL,
                PrimitiveValue::from(row_position as i32),
            ));

            // Slide coordinates swap pixel axes: the pixel matrix's row axis
            // runs along slide X, and its column axis along slide Y.
            if let Some((spacing_x, spacing_y)) = pixel_spacing_mm {
                let x_mm = imaged_volume.offset_x_mm + (row_position - 1) as f64 * spacing_x;
                let y_mm = imaged_volume.offset_y_mm + (column_position - 1) as f64 * spacing_y;
                plane_position.put(DataElement::new(
                    TAG_X_OFFSET_IN_SLIDE_COORDINATE_SYSTEM,
                    VR::FD,
                    PrimitiveValue::from(x_mm),
                ));
                plane_position.put(DataElement::new(
                    TAG_Y_OFFSET_IN_SLIDE_COORDINATE_SYSTEM,
                    VR::FD,
                    PrimitiveValue::from(y_mm),
                ));
                plane_position.put(DataElement::new(
                    TAG_Z_OFFSET_IN_SLIDE_COORDINATE_SYSTEM,
                    VR::FD,
                    PrimitiveValue::from(imaged_volume.depth_mm),
                ));
            }

            let mut item = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
            item.put(sequence_element(TAG_PLANE_POSITION_SLIDE_SEQUENCE, vec![plane_position]));
            item.put(DataElement::new(
                TAG_DIMENSION_INDEX_VALUES,
                VR::UL,
                PrimitiveValue::from(vec![*tile_x + 1, *tile_y + 1]),
            ));
            item
        })
        .collect();
    dataset.put(sequence_element(TAG_PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE, functional_groups));

    if optical_path != OpticalPathTemplate::None {
        let mut optical_path_item = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
        optical_path_item.put(DataElement::new(
            TAG_OPTICAL_PATH_IDENTIFIER,
            VR::SH,
            PrimitiveValue::from("1"),
        ));
        if let Some(icc_profile) = icc_profile {
            optical_path_item.put(DataElement::new(TAG_ICC_PROFILE, VR::OB, PrimitiveValue::from(icc_profile.to_vec())));
        }
        dataset.put(sequence_element(TAG_OPTICAL_PATH_SEQUENCE, vec![optical_path_item]));
    }

    dataset.put(build_pixel_data_element(chunk, compression)?);

    let transfer_syntax_uid = transfer_syntax_for(compression)?;
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(transfer_syntax_uid)
        .media_storage_sop_class_uid(SOP_CLASS_VL_WHOLE_SLIDE_MICROSCOPY_IMAGE_STORAGE)
        .media_storage_sop_instance_uid(sop_instance_uid)
        .build()
        .map_err(|e| PyramidError::InternalError(format!("failed to build DICOM file meta: {}", e)))?;

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in dataset {
        file_obj.put(elem);
    }

    let mut out = Vec::new();
    file_obj
        .write_all(&mut out)
        .map_err(|e| PyramidError::InternalError(format!("failed to serialize DICOM instance: {}", e)))?;
    Ok(out)
}

/// Builds a sequence (SQ) element out of already-constructed item objects.
///
/// `dicom-core` 0.7 models sequence values as `Value::Sequence(DataSetSequence<InMemDicomObject>)`;
/// this is the one construction path in this module not exercised by a
/// retrieved example, so it is called out in the design notes as the
/// single unverified API surface here.
fn sequence_element(tag: Tag, items: Vec<InMemDicomObject>) -> DataElement<InMemDicomObject> {
    let sequence = DataSetSequence::from(items);
    DataElement::new(tag, VR::SQ, Value::Sequence(sequence))
}

/// Builds the `PixelData` element: encapsulated (one fragment per frame, no
/// basic offset table) for compressed transfer syntaxes, or a single
/// contiguous native buffer for `Compression::None`.
fn build_pixel_data_element(
    chunk: &[((u32, u32), Bytes)],
    compression: Compression,
) -> Result<DataElement<InMemDicomObject>, PyramidError> {
    match compression {
        Compression::None => {
            let mut native = Vec::new();
            for (_, bytes) in chunk {
                native.extend_from_slice(bytes);
            }
            Ok(DataElement::new(TAG_PIXEL_DATA, VR::OW, PrimitiveValue::from(native)))
        }
        _ => {
            let fragments: Vec<Vec<u8>> = chunk.iter().map(|(_, bytes)| bytes.to_vec()).collect();
            let sequence = PixelFragmentSequence::new(Vec::new(), fragments);
            Ok(DataElement::new(TAG_PIXEL_DATA, VR::OB, Value::PixelSequence(sequence)))
        }
    }
}

#[async_trait]
impl PyramidWriter for DicomPyramidWriter {
    fn level_count(&self) -> u32 {
        self.tracker.level_count()
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn tile_width(&self) -> u32 {
        self.tracker.tile_width()
    }

    fn tile_height(&self) -> u32 {
        self.tracker.tile_height()
    }

    fn count_tiles_x(&self, level: u32) -> Result<u32, PyramidError> {
        Ok(self.tracker.level(level)?.tiles_x)
    }

    fn count_tiles_y(&self, level: u32) -> Result<u32, PyramidError> {
        Ok(self.tracker.level(level)?.tiles_y)
    }

    async fn add_level(&mut self, width: u32, height: u32) -> Result<(), PyramidError> {
        let level = self.tracker.add_level(width, height)?;
        self.levels.push(LevelBuffer::new(width, height, level.tiles_x, level.tiles_y));
        Ok(())
    }

    async fn write_raw_tile(
        &mut self,
        tile: Bytes,
        compression: Compression,
        level: u32,
        tile_x: u32,
        tile_y: u32,
    ) -> Result<(), PyramidError> {
        self.tracker.level(level)?;
        let bytes = transcode_if_needed(
            tile,
            compression,
            self.compression,
            self.tracker.tile_width(),
            self.tracker.tile_height(),
            self.quality,
        )?;
        self.tracker.mark_tile_written();
        self.levels[level as usize].frames.insert((tile_x, tile_y), bytes);
        Ok(())
    }

    async fn encode_tile(&mut self, tile: &Image, level: u32, tile_x: u32, tile_y: u32) -> Result<(), PyramidError> {
        self.tracker.level(level)?;
        let bytes = crate::pixel::encode_tile(tile, self.compression, self.quality)?;
        self.tracker.mark_tile_written();
        self.levels[level as usize].frames.insert((tile_x, tile_y), bytes);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PyramidError> {
        if self.flushed {
            return Ok(());
        }
        for level_z in 0..self.levels.len() as u32 {
            self.flush_level(level_z).await?;
        }
        self.flushed = true;
        Ok(())
    }
}

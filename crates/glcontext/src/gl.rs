//! GL enumerants used by the core.

pub const NO_ERROR: u32 = 0;
pub const INVALID_ENUM: u32 = 0x0500;
pub const INVALID_VALUE: u32 = 0x0501;
pub const INVALID_OPERATION: u32 = 0x0502;
pub const OUT_OF_MEMORY: u32 = 0x0505;

pub const VENDOR: u32 = 0x1F00;
pub const RENDERER: u32 = 0x1F01;
pub const VERSION: u32 = 0x1F02;
pub const EXTENSIONS: u32 = 0x1F03;
pub const NUM_EXTENSIONS: u32 = 0x821D;

// Buffer binding targets and the query enumerant that reports each binding.
pub const ARRAY_BUFFER: u32 = 0x8892;
pub const ARRAY_BUFFER_BINDING: u32 = 0x8894;
pub const ELEMENT_ARRAY_BUFFER: u32 = 0x8893;
pub const ELEMENT_ARRAY_BUFFER_BINDING: u32 = 0x8895;
pub const PIXEL_PACK_BUFFER: u32 = 0x88EB;
pub const PIXEL_PACK_BUFFER_BINDING: u32 = 0x88ED;
pub const PIXEL_UNPACK_BUFFER: u32 = 0x88EC;
pub const PIXEL_UNPACK_BUFFER_BINDING: u32 = 0x88EF;
pub const UNIFORM_BUFFER: u32 = 0x8A11;
pub const UNIFORM_BUFFER_BINDING: u32 = 0x8A28;
pub const TEXTURE_BUFFER: u32 = 0x8C2A;
pub const TEXTURE_BINDING_BUFFER: u32 = 0x8C2C;
pub const TRANSFORM_FEEDBACK_BUFFER: u32 = 0x8C8E;
pub const TRANSFORM_FEEDBACK_BUFFER_BINDING: u32 = 0x8C8F;
pub const COPY_READ_BUFFER: u32 = 0x8F36;
pub const COPY_WRITE_BUFFER: u32 = 0x8F37;
pub const DRAW_INDIRECT_BUFFER: u32 = 0x8F3F;
pub const DRAW_INDIRECT_BUFFER_BINDING: u32 = 0x8F43;
pub const DISPATCH_INDIRECT_BUFFER: u32 = 0x90EE;
pub const DISPATCH_INDIRECT_BUFFER_BINDING: u32 = 0x90EF;
pub const SHADER_STORAGE_BUFFER: u32 = 0x90D2;
pub const SHADER_STORAGE_BUFFER_BINDING: u32 = 0x90D3;
pub const QUERY_BUFFER: u32 = 0x9192;
pub const QUERY_BUFFER_BINDING: u32 = 0x9193;
pub const ATOMIC_COUNTER_BUFFER: u32 = 0x92C0;
pub const ATOMIC_COUNTER_BUFFER_BINDING: u32 = 0x92C1;
pub const VERTEX_ARRAY_BINDING: u32 = 0x85B5;

pub const BUFFER_SIZE: u32 = 0x8764;

pub const STREAM_DRAW: u32 = 0x88E0;
pub const STATIC_DRAW: u32 = 0x88E4;
pub const DYNAMIC_DRAW: u32 = 0x88E8;

pub const READ_ONLY: u32 = 0x88B8;
pub const WRITE_ONLY: u32 = 0x88B9;
pub const READ_WRITE: u32 = 0x88BA;

pub const MAP_READ_BIT: u32 = 0x0001;
pub const MAP_WRITE_BIT: u32 = 0x0002;
pub const MAP_PERSISTENT_BIT: u32 = 0x0040;
pub const MAP_COHERENT_BIT: u32 = 0x0080;
pub const DYNAMIC_STORAGE_BIT: u32 = 0x0100;
pub const CLIENT_STORAGE_BIT: u32 = 0x0200;

pub const CLIENT_VERTEX_ARRAY_BIT: u32 = 0x0000_0002;
pub const CLIENT_ALL_ATTRIB_BITS: u32 = 0xFFFF_FFFF;

/// Translate legacy `glMapBuffer` access enumerants to `glMapBufferRange` bits.
pub fn access_to_range_bits(access: u32) -> u32 {
    match access {
        READ_ONLY => MAP_READ_BIT,
        WRITE_ONLY => MAP_WRITE_BIT,
        READ_WRITE => MAP_READ_BIT | MAP_WRITE_BIT,
        other => other,
    }
}

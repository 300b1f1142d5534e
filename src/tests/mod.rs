mod codec;
mod status;

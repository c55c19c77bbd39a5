mod properties;
mod shipped_patches;

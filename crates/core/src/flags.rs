//! Discrete state flags carried by entity sync packets.

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Per-update boolean state of a synchronized vehicle.
    pub struct VehicleDataFlags: u32 {
        /// Engine is running.
        const IS_ENGINE_RUNNING = 1 << 0;
        /// Headlights are on.
        const ARE_LIGHTS_ON = 1 << 1;
        /// Brake lights are lit.
        const ARE_BRAKE_LIGHTS_ON = 1 << 2;
        /// High beams are on.
        const ARE_HIGH_BEAMS_ON = 1 << 3;
        /// Siren is sounding.
        const IS_SIREN_ACTIVE = 1 << 4;
        /// Vehicle is destroyed.
        const IS_DEAD = 1 << 5;
        /// Horn is held.
        const IS_HORN_ACTIVE = 1 << 6;
        /// Amphibious vehicle is in its submarine form.
        const IS_TRANSFORMED = 1 << 7;
        /// Convertible roof is open.
        const ROOF_OPENED = 1 << 8;
        /// Vehicle is an aircraft (landing gear applies).
        const IS_AIRCRAFT = 1 << 9;
        /// Vehicle is on fire.
        const IS_ON_FIRE = 1 << 10;
        /// Owner repaired the vehicle since the last full sync.
        const REPAIRED = 1 << 11;
        /// Rocket boost is active.
        const IS_ROCKET_BOOST_ACTIVE = 1 << 12;
        /// Parachute is deployed.
        const IS_PARACHUTE_ACTIVE = 1 << 13;
        /// Update carries the full discrete-state snapshot.
        const IS_FULL_SYNC = 1 << 14;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    /// Per-update boolean state of a synchronized ped.
    pub struct PedDataFlags: u32 {
        /// Ped is aiming.
        const IS_AIMING = 1 << 0;
        /// Ped is in stealth mode.
        const IS_IN_STEALTH_MODE = 1 << 1;
        /// Ped is reloading.
        const IS_RELOADING = 1 << 2;
        /// Ped is jumping.
        const IS_JUMPING = 1 << 3;
        /// Ped is ragdolling.
        const IS_RAGDOLL = 1 << 4;
        /// Ped is on fire.
        const IS_ON_FIRE = 1 << 5;
        /// Ped is free-falling with a parachute.
        const IS_IN_PARACHUTE_FREE_FALL = 1 << 6;
        /// Ped's parachute is open.
        const IS_PARACHUTE_OPEN = 1 << 7;
        /// Ped is climbing a ladder.
        const IS_ON_LADDER = 1 << 8;
        /// Ped is vaulting.
        const IS_VAULTING = 1 << 9;
        /// Ped is in cover.
        const IS_IN_COVER = 1 << 10;
        /// Ped is invincible.
        const IS_INVINCIBLE = 1 << 11;
        /// Update carries the full discrete-state snapshot.
        const IS_FULL_SYNC = 1 << 12;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sync_bits_survive_truncation() {
        let flags = VehicleDataFlags::IS_FULL_SYNC | VehicleDataFlags::ARE_LIGHTS_ON;
        assert_eq!(VehicleDataFlags::from_bits_truncate(flags.bits()), flags);
    }

    #[test]
    fn unknown_ped_bits_are_dropped() {
        let flags = PedDataFlags::from_bits_truncate(u32::MAX);
        assert!(flags.contains(PedDataFlags::IS_FULL_SYNC));
        assert_eq!(flags, PedDataFlags::all());
    }
}

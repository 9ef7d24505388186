//! Integration tests for the bridge: derived classes, identity, member access

use std::sync::Arc;
use tether_sdk::{
    Access, Bridge, BridgeError, CallFrame, ClassBuilder, DynValue, Exposed, ExposedClass,
    MemberKind, ObjectCache, PrimitiveKind, ProxyHandle, RegistrationError, UnixTime,
};

#[allow(dead_code)]
#[derive(Exposed)]
#[exposed(methods = Player::methods)]
struct Player {
    #[exposed]
    flag: i8,
    #[exposed]
    small: i16,
    #[exposed]
    hp: i32,
    #[exposed]
    big: i64,
    #[exposed]
    born: UnixTime,
    #[exposed]
    alive: bool,
    #[exposed]
    speed: f32,
    #[exposed]
    ratio: f64,
    #[exposed]
    tag: [u8; 8],
    #[exposed]
    title: String,
    #[exposed(readonly, rename = "level")]
    lvl: i16,
    secret: u64,
}

impl Player {
    fn new() -> Self {
        Player {
            flag: 0,
            small: 0,
            hp: 100,
            big: 0,
            born: UnixTime(0),
            alive: true,
            speed: 0.0,
            ratio: 0.0,
            tag: [0; 8],
            title: String::new(),
            lvl: 3,
            secret: 7,
        }
    }

    fn heal(&mut self, amount: i32) -> i32 {
        self.hp += amount;
        self.hp
    }

    fn greet(&self, who: String, times: u8) -> String {
        format!("{} x{} from {}", who, times, self.title)
    }

    fn methods(class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError> {
        class.method("heal", Player::heal)?.method("greet", Player::greet)?;
        Ok(())
    }
}

#[allow(dead_code)]
#[derive(Exposed)]
#[exposed(name = "Pet")]
#[repr(C)]
struct Pet {
    #[exposed]
    age: i32,
}

#[allow(dead_code)]
#[derive(Exposed)]
#[exposed(methods = Owner::methods)]
#[repr(C)]
struct Owner {
    #[exposed]
    id: i64,
    pet: Pet,
}

impl Owner {
    fn pet(&mut self) -> Exposed<Pet> {
        unsafe { Exposed::new(&mut self.pet) }
    }

    fn nobody(&self) -> Exposed<Pet> {
        unsafe { Exposed::new(std::ptr::null_mut()) }
    }

    fn methods(class: &mut ClassBuilder<Self>) -> Result<(), RegistrationError> {
        class.method("pet", Owner::pet)?.method("nobody", Owner::nobody)?;
        Ok(())
    }
}

#[allow(dead_code)]
#[derive(Exposed)]
#[repr(C)]
struct Kennel {
    inner: Pet,
}

fn bind<T: ExposedClass>(bridge: &Bridge, object: &mut T) -> ProxyHandle {
    match unsafe { bridge.bind(object as *mut T) } {
        Ok(DynValue::Object(handle)) => handle,
        other => panic!("expected object, got {:?}", other),
    }
}

#[test]
fn test_derived_metadata() {
    let bridge = Bridge::new();
    let meta = bridge.register::<Player>().unwrap();
    assert_eq!(meta.name(), "_class_meta:Player");

    let names: Vec<_> = meta.members().iter().map(|m| m.name()).collect();
    assert_eq!(
        names,
        [
            "flag", "small", "hp", "big", "born", "alive", "speed", "ratio", "tag", "title",
            "level", "heal", "greet"
        ]
    );
    assert_eq!(
        meta.member("born").unwrap().kind(),
        MemberKind::Data(PrimitiveKind::Time)
    );
    assert_eq!(meta.member("level").unwrap().access(), Access::ReadOnly);
    assert!(meta.member("secret").is_none());
    assert!(meta.member("lvl").is_none());

    assert_eq!(Pet::META_NAME, "_class_meta:Pet");
}

#[test]
fn test_identity_is_idempotent() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    let first = bind(&bridge, &mut player);
    let second = bind(&bridge, &mut player);
    assert_eq!(first, second);
    assert_eq!(bridge.cache().len(), 1);
}

#[test]
fn test_null_pointer_is_nil() {
    let bridge = Bridge::new();
    let value = unsafe { bridge.bind(std::ptr::null_mut::<Player>()) }.unwrap();
    assert_eq!(value, DynValue::Nil);
    assert!(bridge.cache().is_empty());
}

#[test]
fn test_reclamation_after_collect() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    let address = &mut player as *mut Player as usize;

    let handle = bind(&bridge, &mut player);
    drop(handle);
    assert!(bridge.cache().lookup(address).is_none());
    assert_eq!(bridge.cache().collect(), 1);
    assert!(bridge.cache().is_empty());

    let again = bind(&bridge, &mut player);
    assert_eq!(again.strong_count(), 1);
    assert_eq!(bridge.cache().live_count(), 1);
}

#[test]
fn test_finalize_removes_single_slot() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    let address = &mut player as *mut Player as usize;
    drop(bind(&bridge, &mut player));
    assert!(bridge.cache().finalize(address));
    assert!(bridge.cache().is_empty());
}

#[test]
fn test_metadata_built_once_per_class() {
    let bridge = Bridge::new();
    let mut a = Player::new();
    let mut b = Player::new();
    let pa = bind(&bridge, &mut a);
    let pb = bind(&bridge, &mut b);
    assert_ne!(pa, pb);
    assert!(Arc::ptr_eq(pa.meta(), pb.meta()));
    assert_eq!(bridge.registry().registrations(), 1);
}

#[test]
fn test_member_round_trip_every_kind() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    let h = bind(&bridge, &mut player);

    let cases = [
        ("flag", DynValue::Int(300), DynValue::Int(44)),
        ("small", DynValue::Int(70000), DynValue::Int(4464)),
        ("hp", DynValue::Num(12.9), DynValue::Int(12)),
        ("big", DynValue::str("9000000000"), DynValue::Int(9_000_000_000)),
        ("born", DynValue::Int(1_700_000_000), DynValue::Int(1_700_000_000)),
        ("alive", DynValue::Nil, DynValue::Bool(false)),
        ("speed", DynValue::Num(1.5), DynValue::Num(1.5)),
        ("ratio", DynValue::Num(0.25), DynValue::Num(0.25)),
        ("tag", DynValue::str("abcdefghij"), DynValue::str("abcdefg")),
        ("title", DynValue::Int(42), DynValue::str("42")),
    ];
    for (member, input, expected) in cases {
        bridge.set(&h, member, &input).unwrap();
        assert_eq!(bridge.get(&h, member).unwrap(), expected, "member {}", member);
    }

    bridge.set(&h, "tag", &DynValue::str("hi")).unwrap();
    assert_eq!(bridge.get(&h, "tag").unwrap(), DynValue::str("hi"));
    bridge.set(&h, "alive", &DynValue::Int(0)).unwrap();
    assert_eq!(bridge.get(&h, "alive").unwrap(), DynValue::Bool(true));

    drop(h);
    assert_eq!(player.flag, 44);
    assert_eq!(player.born, UnixTime(1_700_000_000));
    assert_eq!(&player.tag, b"hi\0\0\0\0\0\0");
    assert_eq!(player.title, "42");
}

#[test]
fn test_readonly_member() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    let h = bind(&bridge, &mut player);
    assert_eq!(bridge.get(&h, "level").unwrap(), DynValue::Int(3));
    let err = bridge.set(&h, "level", &DynValue::Int(9)).unwrap_err();
    assert_eq!(
        err,
        BridgeError::ReadOnly {
            class: "_class_meta:Player",
            member: "level".into()
        }
    );
    assert_eq!(bridge.get(&h, "level").unwrap(), DynValue::Int(3));
}

#[test]
fn test_invoke_methods() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    player.title = "the keep".into();
    let h = bind(&bridge, &mut player);

    let mut frame = CallFrame::new(&bridge, vec![DynValue::Int(5)]);
    let count = bridge.invoke(&h, "heal", &mut frame).unwrap();
    assert_eq!(count, 1);
    assert_eq!(frame.results(), &[DynValue::Int(105)]);

    let out = bridge
        .call(&h, "greet", vec![DynValue::str("ana"), DynValue::Int(2)])
        .unwrap();
    assert_eq!(out, vec![DynValue::str("ana x2 from the keep")]);

    // Missing arguments read as nil
    let out = bridge.call(&h, "greet", vec![]).unwrap();
    assert_eq!(out, vec![DynValue::str(" x0 from the keep")]);
}

#[test]
fn test_identity_tags() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    let address = &mut player as *mut Player as usize;
    let h = bind(&bridge, &mut player);
    assert_eq!(bridge.get(&h, "__pointer__").unwrap(), DynValue::Pointer(address));
    assert_eq!(
        bridge.get(&h, "__name__").unwrap(),
        DynValue::str("_class_meta:Player")
    );
}

#[test]
fn test_returned_objects_are_bound() {
    let bridge = Bridge::new();
    let mut owner = Owner {
        id: 1,
        pet: Pet { age: 4 },
    };
    let h = bind(&bridge, &mut owner);

    let first = bridge.call(&h, "pet", vec![]).unwrap();
    let second = bridge.call(&h, "pet", vec![]).unwrap();
    assert_eq!(first, second);
    let pet = first[0].as_object().unwrap();
    assert_eq!(pet.meta_name(), "_class_meta:Pet");
    assert_eq!(bridge.get(pet, "age").unwrap(), DynValue::Int(4));

    assert_eq!(bridge.call(&h, "nobody", vec![]).unwrap(), vec![DynValue::Nil]);
}

#[test]
fn test_aliased_pointer_rejected() {
    let bridge = Bridge::new();
    let mut kennel = Kennel {
        inner: Pet { age: 1 },
    };
    let outer: *mut Kennel = &mut kennel;
    let inner: *mut Pet = unsafe { std::ptr::addr_of_mut!((*outer).inner) };

    let held = unsafe { bridge.bind(outer) }.unwrap();
    let err = unsafe { bridge.bind(inner) }.unwrap_err();
    assert_eq!(
        err,
        BridgeError::AliasedPointer {
            address: outer as usize,
            bound: "_class_meta:Kennel",
            requested: "_class_meta:Pet",
        }
    );

    drop(held);
    let pet = unsafe { bridge.bind(inner) }.unwrap();
    assert_eq!(pet.as_object().unwrap().meta_name(), "_class_meta:Pet");
}

#[test]
fn test_invalidated_proxy_is_detached() {
    let bridge = Bridge::new();
    let mut player = Player::new();
    let h = bind(&bridge, &mut player);
    assert!(bridge.cache().invalidate(h.address()));
    assert!(h.is_detached());
    assert!(matches!(
        bridge.call(&h, "heal", vec![DynValue::Int(1)]),
        Err(BridgeError::Detached { .. })
    ));
    assert!(matches!(
        bridge.set(&h, "hp", &DynValue::Int(1)),
        Err(BridgeError::Detached { .. })
    ));

    let fresh = bind(&bridge, &mut player);
    assert_ne!(fresh, h);
    assert!(!fresh.is_detached());
}

#[test]
fn test_shared_cache_across_bridges() {
    let cache = Arc::new(ObjectCache::new());
    let left = Bridge::builder().shared_cache(Arc::clone(&cache)).build();
    let right = Bridge::builder().shared_cache(Arc::clone(&cache)).build();
    let mut player = Player::new();

    let a = bind(&left, &mut player);
    let b = bind(&right, &mut player);
    assert_eq!(a, b);
    assert_eq!(cache.len(), 1);

    let isolated = Bridge::new();
    let c = bind(&isolated, &mut player);
    assert_ne!(a, c);
}
